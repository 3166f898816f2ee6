use fflab_core::{HandleLoad, KinematicSample, Vec2};

use crate::error::DeviceError;

/// Safety flags sampled once per idle tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub safe: bool,
    pub activated: bool,
    pub ramped: bool,
}

impl DeviceStatus {
    pub const READY: DeviceStatus = DeviceStatus {
        safe: true,
        activated: true,
        ramped: true,
    };

    /// Handle switch pressed and motors ramped up.
    pub fn is_active(&self) -> bool {
        self.activated && self.ramped
    }
}

/// Haptic manipulandum the controller runs against.
///
/// The driver pulls a sample, runs the control tick, and pushes the
/// resulting force back every servo period.
pub trait HapticDevice {
    fn open(&mut self) -> Result<(), DeviceError>;

    fn start(&mut self) -> Result<(), DeviceError>;

    fn stop(&mut self);

    fn close(&mut self);

    fn is_safe(&self) -> bool;

    fn is_activated(&self) -> bool;

    fn is_ramped(&self) -> bool;

    fn read_sample(&mut self) -> KinematicSample;

    fn apply_force(&mut self, force: Vec2);

    /// Handle force/torque, when a sensor is fitted.
    fn read_force_torque(&mut self) -> Option<HandleLoad>;

    fn reset_sensor_bias(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Servo rate in Hz.
    fn loop_frequency(&self) -> f64;

    fn status(&self) -> DeviceStatus {
        DeviceStatus {
            safe: self.is_safe(),
            activated: self.is_activated(),
            ramped: self.is_ramped(),
        }
    }
}
