pub mod impulse_sensor;
