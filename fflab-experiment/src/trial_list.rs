use std::path::Path;

use fflab_core::{
    ContextKind, ContextSpec, FieldKind, ForceFieldSpec, MovementDirection, MovementType,
    TrialGeometry, TrialSpec,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ExperimentConfig;
use crate::error::TrialListError;

/// Ordered trials the state machine runs through.
pub trait TrialSource {
    fn trial_count(&self) -> usize;

    fn load_trial(&self, index: usize) -> Option<TrialSpec>;
}

#[derive(Debug, Clone, Default)]
pub struct TrialList {
    trials: Vec<TrialSpec>,
}

impl TrialList {
    /// Takes trials as given, renumbering them by position.
    pub fn new(mut trials: Vec<TrialSpec>) -> Self {
        for (i, t) in trials.iter_mut().enumerate() {
            t.index = i;
        }
        Self { trials }
    }

    pub fn trials(&self) -> &[TrialSpec] {
        &self.trials
    }
}

impl TrialSource for TrialList {
    fn trial_count(&self) -> usize {
        self.trials.len()
    }

    fn load_trial(&self, index: usize) -> Option<TrialSpec> {
        self.trials.get(index).copied()
    }
}

/// Field and context pair selected by a trial's field index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub field: ForceFieldSpec,
    #[serde(default)]
    pub context: ContextSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlannedTrial {
    #[serde(default)]
    pub phase: u32,
    pub field_index: usize,
}

/// Precomputed subject trial order with the field definitions it indexes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialPlan {
    pub fields: Vec<FieldDefinition>,
    pub trials: Vec<PlannedTrial>,
}

impl TrialPlan {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TrialListError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TrialListError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| TrialListError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Turns a plan into the full trial list: geometry, delays, passive
/// returns and passive-wait flags.
pub struct TrialListBuilder<'a> {
    config: &'a ExperimentConfig,
    plan: TrialPlan,
    passive_returns: bool,
}

impl<'a> TrialListBuilder<'a> {
    pub fn new(config: &'a ExperimentConfig) -> Self {
        Self {
            config,
            plan: TrialPlan::default(),
            passive_returns: config.movement_type.has_passive_returns(),
        }
    }

    pub fn plan(mut self, plan: TrialPlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_passive_returns(mut self, enabled: bool) -> Self {
        self.passive_returns = enabled;
        self
    }

    pub fn build<R: Rng + ?Sized>(self, rng: &mut R) -> Result<TrialList, TrialListError> {
        self.config.validate()?;
        if self.plan.trials.is_empty() {
            return Err(TrialListError::Empty);
        }

        let delays = self.config.delay_distribution();
        let mut subjects = Vec::with_capacity(self.plan.trials.len());
        for (i, planned) in self.plan.trials.iter().enumerate() {
            let def = self.plan.fields.get(planned.field_index).ok_or(
                TrialListError::UnknownFieldIndex {
                    trial: i,
                    field_index: planned.field_index,
                    defined: self.plan.fields.len(),
                },
            )?;
            let movement_order = def.context.movement_order().ok_or(
                TrialListError::InvalidMovementOrder {
                    field_index: planned.field_index,
                    code: def.context.constants[3],
                },
            )?;
            let channel_order =
                def.context
                    .channel_order()
                    .ok_or(TrialListError::InvalidChannelOrder {
                        field_index: planned.field_index,
                        code: def.context.constants[4],
                    })?;

            let geometry = TrialGeometry::derive(
                self.config.via_position,
                self.config.movement_first_distance,
                self.config.movement_second_distance,
                &def.context,
                movement_order,
                self.config.movement_type,
            );

            subjects.push(TrialSpec {
                index: i,
                phase: planned.phase,
                field_index: planned.field_index,
                field: def.field,
                context: def.context,
                movement_order,
                channel_order,
                geometry,
                trial_delay: delays.sample(rng),
                passive_wait_first: false,
                passive_wait_last: false,
                direction: match self.config.movement_type {
                    MovementType::OutAndBack => MovementDirection::OutAndBack,
                    MovementType::OutThenBack | MovementType::OutOnly => MovementDirection::Out,
                },
            });
        }

        mark_passive_wait(&mut subjects);

        let trials = if self.passive_returns {
            interleave_returns(&subjects)
        } else {
            subjects
        };
        let list = TrialList::new(trials);

        let count = list.trial_count();
        if let Some(&after) = self
            .config
            .rest_break_trials
            .iter()
            .find(|&&after| after >= count)
        {
            return Err(TrialListError::RestBreakOutOfRange {
                after,
                trials: count,
            });
        }

        info!(
            subject_trials = self.plan.trials.len(),
            trials = count,
            passive_returns = self.passive_returns,
            "trial list built"
        );
        Ok(list)
    }
}

/// Flags the first and last trial of each run of passive-wait trials. The
/// ends of the list count as run boundaries.
fn mark_passive_wait(subjects: &mut [TrialSpec]) {
    let waits: Vec<bool> = subjects.iter().map(TrialSpec::is_passive_wait).collect();
    for (i, t) in subjects.iter_mut().enumerate() {
        if !waits[i] {
            continue;
        }
        t.passive_wait_first = i == 0 || !waits[i - 1];
        t.passive_wait_last = i + 1 == waits.len() || !waits[i + 1];
    }
}

/// Places a robot-driven return before every subject trial but the first.
/// The return carries the hand to the start of the trial that follows it.
fn interleave_returns(subjects: &[TrialSpec]) -> Vec<TrialSpec> {
    let mut out = Vec::with_capacity(subjects.len() * 2);
    for (i, next) in subjects.iter().enumerate() {
        if i > 0 {
            let prev = &subjects[i - 1];
            out.push(passive_return(prev, next));
        }
        out.push(*next);
    }
    out
}

fn passive_return(prev: &TrialSpec, next: &TrialSpec) -> TrialSpec {
    let mut back = *next;
    back.direction = MovementDirection::Back;
    back.field = ForceFieldSpec::passive_move();
    back.context.kind = ContextKind::PassiveMove;
    back.geometry.finish = next.geometry.start;
    back.passive_wait_first = false;
    back.passive_wait_last = false;

    // Inside a run of passive-wait trials the subject stays held.
    if prev.is_passive_wait() && next.is_passive_wait() {
        back.field.kind = FieldKind::SameAsLast;
    }
    back
}
