use serde::{Deserialize, Serialize};

/// Number of numeric constants carried by field and context definitions.
pub const FIELD_CONSTANTS: usize = 8;

/// Force field applied by the robot during a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    None,
    /// Velocity-dependent curl or viscous field.
    Viscous,
    /// Spring-damper walls either side of a straight channel.
    Channel,
    /// Robot carries the hand along a minimum-jerk path.
    PassiveMove,
    /// Spring-damper to a fixed point.
    Spring2D,
    /// Keep whichever robot field the previous trial ended with.
    SameAsLast,
}

impl FieldKind {
    pub const ALL: [FieldKind; 6] = [
        FieldKind::None,
        FieldKind::Viscous,
        FieldKind::Channel,
        FieldKind::PassiveMove,
        FieldKind::Spring2D,
        FieldKind::SameAsLast,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FieldKind::None => "None",
            FieldKind::Viscous => "Viscous",
            FieldKind::Channel => "Channel",
            FieldKind::PassiveMove => "PassiveMove",
            FieldKind::Spring2D => "Spring2D",
            FieldKind::SameAsLast => "SameAsLast",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Field definition loaded for one trial.
///
/// Constant meaning depends on the kind: `c0` is the stiffness or viscosity,
/// `c1` the damping term where one applies.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ForceFieldSpec {
    pub kind: FieldKind,
    #[serde(default)]
    pub constants: [f64; FIELD_CONSTANTS],
    /// Degrees.
    #[serde(default)]
    pub angle: f64,
}

impl ForceFieldSpec {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn viscous(viscosity: f64, angle: f64) -> Self {
        Self::with_constants(FieldKind::Viscous, &[viscosity], angle)
    }

    pub fn channel(stiffness: f64, damping: f64) -> Self {
        Self::with_constants(FieldKind::Channel, &[stiffness, damping], 0.0)
    }

    pub fn spring(stiffness: f64, damping: f64) -> Self {
        Self::with_constants(FieldKind::Spring2D, &[stiffness, damping], 0.0)
    }

    pub fn passive_move() -> Self {
        Self {
            kind: FieldKind::PassiveMove,
            ..Self::default()
        }
    }

    pub fn same_as_last() -> Self {
        Self {
            kind: FieldKind::SameAsLast,
            ..Self::default()
        }
    }

    fn with_constants(kind: FieldKind, values: &[f64], angle: f64) -> Self {
        let mut constants = [0.0; FIELD_CONSTANTS];
        for (slot, v) in constants.iter_mut().zip(values) {
            *slot = *v;
        }
        Self {
            kind,
            constants,
            angle,
        }
    }

    pub fn constant(&self, i: usize) -> f64 {
        self.constants.get(i).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_default_to_zero_in_json() {
        let spec: ForceFieldSpec = serde_json::from_str(r#"{ "kind": "viscous" }"#).unwrap();
        assert_eq!(spec.kind, FieldKind::Viscous);
        assert_eq!(spec.constants, [0.0; FIELD_CONSTANTS]);
        assert_eq!(spec.constant(42), 0.0);
    }

    #[test]
    fn builders_fill_leading_constants() {
        let spec = ForceFieldSpec::channel(-30.0, -0.05);
        assert_eq!(spec.constant(0), -30.0);
        assert_eq!(spec.constant(1), -0.05);
        assert_eq!(spec.constant(2), 0.0);
    }
}
