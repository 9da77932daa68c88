// Hexapod motion runtime: kinematics, gaits, calibration and the control loop

pub mod actuation;
pub mod command;
pub mod config;
pub mod control;
pub mod messages;
pub mod motion;
pub mod routines;
pub mod runtime;
pub mod sensor;
pub mod state;
