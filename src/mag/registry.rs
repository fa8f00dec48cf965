// Registres du QMC5883L
// http://wiki.sunfounder.cc/images/7/72/QMC5883L-Datasheet-1.0.pdf
pub const QMC5883L_MAG_ADDR: u16 = 0x0D;

pub const QMC5883L_X_L: u8 = 0x00;
pub const QMC5883L_X_H: u8 = 0x01;
pub const QMC5883L_Y_L: u8 = 0x02;
pub const QMC5883L_Y_H: u8 = 0x03;
pub const QMC5883L_Z_L: u8 = 0x04;
pub const QMC5883L_Z_H: u8 = 0x05;

pub const QMC5883L_INFO: u8 = 0x06;
pub const QMC5883L_SETTINGS: u8 = 0x09;
pub const QMC5883L_SETRESET: u8 = 0x0B;
pub const QMC5883L_CHIP_ID: u8 = 0x0D;

pub const QMC5883L_INFO_DRDY_BIT: u8 = 0;
pub const QMC5883L_INFO_OVL_BIT: u8 = 1;
pub const QMC5883L_INFO_DOR_BIT: u8 = 2;

// Valeur du registre de période Set/Reset, imposée par le datasheet
pub const QMC5883L_PERIODE_DEFAUT: u8 = 0x01;

// Champs de l'octet de configuration (registre 0x09). Un seul motif
// par champ, l'octet complet se compose par OU binaire.
pub const QMC5883L_CONTINUOUS: u8 = 0x01; // Mesure continue
pub const QMC5883L_STANDBY: u8 = 0x00; // Mode veille

pub const QMC5883L_ODR_10HZ: u8 = 0x00;
pub const QMC5883L_ODR_50HZ: u8 = 0x04;
pub const QMC5883L_ODR_100HZ: u8 = 0x08;
pub const QMC5883L_ODR_200HZ: u8 = 0x0C;

pub const QMC5883L_RNG_2G: u8 = 0x00; // Pleine échelle ±2G, sensibilité maximale
pub const QMC5883L_RNG_8G: u8 = 0x10; // Pleine échelle ±8G, pour environnement perturbé

pub const QMC5883L_OSR_512: u8 = 0x00; // Sur-échantillonnage fort, bruit minimal
pub const QMC5883L_OSR_256: u8 = 0x40;
pub const QMC5883L_OSR_128: u8 = 0x80;
pub const QMC5883L_OSR_64: u8 = 0xC0;

// Facteurs d'échelle associés à la pleine échelle configurée
pub const QMC5883L_SCALE_2G: f64 = 1.22;
pub const QMC5883L_SCALE_8G: f64 = 4.35;

pub const QMC5883L_CONFIG_DEFAUT: u8 =
    QMC5883L_CONTINUOUS | QMC5883L_ODR_100HZ | QMC5883L_RNG_8G | QMC5883L_OSR_512;
