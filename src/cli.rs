use anyhow::bail;
use clap::Parser;
use std::f64::consts::PI;

use crate::mag::registry;
use crate::mag::DECLINAISON_DEFAUT;

#[derive(Debug, Parser, Clone)]
pub struct Cli {
    /// Numéro du bus I2C
    #[arg(long, default_value_t = 1)]
    pub bus: u8,

    /// Adresse du capteur sur le bus
    #[arg(long, default_value_t = registry::QMC5883L_MAG_ADDR)]
    pub address: u16,

    /// Mode veille plutôt que mesure continue
    #[arg(long)]
    pub standby: bool,

    /// Cadence de sortie du capteur, en Hz (10, 50, 100 ou 200)
    #[arg(long, default_value_t = 100)]
    pub odr: u16,

    /// Pleine échelle, en gauss (2 ou 8)
    #[arg(long, default_value_t = 8)]
    pub range: u8,

    /// Sur-échantillonnage (64, 128, 256 ou 512)
    #[arg(long, default_value_t = 512)]
    pub osr: u16,

    /// Offset de l'axe X, issu de la calibration
    #[arg(long, default_value_t = 0)]
    pub offset_x: i16,

    /// Offset de l'axe Y, issu de la calibration
    #[arg(long, default_value_t = 0)]
    pub offset_y: i16,

    /// Offset de l'axe Z
    #[arg(long, default_value_t = 0)]
    pub offset_z: i16,

    /// Déclinaison magnétique locale, en degrés
    #[arg(long)]
    pub declination: Option<f64>,

    /// Lance la procédure de calibration du compas
    #[arg(long)]
    pub calibrate: bool,

    /// Période d'affichage du cap, en millisecondes
    #[arg(long, default_value_t = 100)]
    pub interval_ms: u64,
}

impl Cli {
    /// Compose l'octet de configuration du capteur à partir des options
    pub fn config_byte(&self) -> anyhow::Result<u8> {
        let mode = if self.standby {
            registry::QMC5883L_STANDBY
        } else {
            registry::QMC5883L_CONTINUOUS
        };

        let odr = match self.odr {
            10 => registry::QMC5883L_ODR_10HZ,
            50 => registry::QMC5883L_ODR_50HZ,
            100 => registry::QMC5883L_ODR_100HZ,
            200 => registry::QMC5883L_ODR_200HZ,
            autre => bail!("cadence non supportée: {} Hz", autre),
        };

        let rng = match self.range {
            2 => registry::QMC5883L_RNG_2G,
            8 => registry::QMC5883L_RNG_8G,
            autre => bail!("pleine échelle non supportée: {} G", autre),
        };

        let osr = match self.osr {
            512 => registry::QMC5883L_OSR_512,
            256 => registry::QMC5883L_OSR_256,
            128 => registry::QMC5883L_OSR_128,
            64 => registry::QMC5883L_OSR_64,
            autre => bail!("sur-échantillonnage non supporté: {}", autre),
        };

        Ok(mode | odr | rng | osr)
    }

    /// Déclinaison en radians, constante locale par défaut
    pub fn declination_radians(&self) -> f64 {
        match self.declination {
            Some(degres) => degres * PI / 180.0,
            None => DECLINAISON_DEFAUT,
        }
    }
}
