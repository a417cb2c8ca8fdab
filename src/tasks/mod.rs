pub mod bridge;
pub mod physics;
pub mod replay;

#[cfg(target_os = "espidf")]
pub mod impulse;
