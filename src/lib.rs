//! Pilote pour le magnétomètre 3 axes QMC5883L sur bus I2C.

pub mod cli;
pub mod i2c;
pub mod mag;
