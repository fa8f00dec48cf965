use std::error::Error;

#[cfg(feature = "real-sensors")]
use rppal::i2c::I2c;

/// Accès registre à un périphérique sur le bus I2C.
///
/// Les pilotes de capteurs passent par ce trait plutôt que par le bus
/// directement, ce qui permet de les tester avec un bus simulé.
pub trait I2CBus {
    type Error: Error + Send + Sync + 'static;

    /// Ecrit un octet dans un registre du périphérique
    fn write_register(&mut self, registre: u8, valeur: u8) -> Result<(), Self::Error>;

    /// Ecriture brute (sert à sélectionner le registre de départ d'une lecture)
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Lecture brute depuis le registre sélectionné, retourne le nombre
    /// d'octets réellement reçus
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error>;
}

#[cfg(feature = "real-sensors")]
impl I2CBus for I2c {
    type Error = rppal::i2c::Error;

    fn write_register(&mut self, registre: u8, valeur: u8) -> Result<(), Self::Error> {
        self.block_write(registre, &[valeur])
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        I2c::write(self, data)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        I2c::read(self, buffer)
    }
}

/// Ouvre le bus I2C demandé et sélectionne l'adresse du périphérique
#[cfg(feature = "real-sensors")]
pub fn open(bus: u8, adresse: u16) -> anyhow::Result<I2c> {
    let mut i2c = I2c::with_bus(bus)?;
    i2c.set_slave_address(adresse)?;
    Ok(i2c)
}
