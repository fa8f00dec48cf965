use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::Poll;

#[cfg(any(feature = "real-sensors", feature = "fake-sensors"))]
use std::thread;
#[cfg(any(feature = "real-sensors", feature = "fake-sensors"))]
use std::time::Duration;

use anyhow::anyhow;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[cfg(feature = "real-sensors")]
use super::QMC5883L;

#[cfg(all(feature = "fake-sensors", not(feature = "real-sensors")))]
use rand::Rng;

/// Réglages du capteur, transmis au thread de lecture
#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub bus: u8,
    pub address: u16,
    pub config: u8,
    pub offset: (i16, i16, i16),
    pub mag_decl: f64,
}

#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Data {
    pub raw: (i16, i16, i16),
    pub heading: f64,
}

pub struct Reader {
    data: Arc<Mutex<anyhow::Result<Data>>>,
    token: CancellationToken,
}

impl Reader {
    /// Lance le thread de lecture. Défini quelle que soit la combinaison de
    /// features: sans backend capteur, le flux ne porte qu'une erreur.
    pub fn new(token: CancellationToken, options: Options) -> anyhow::Result<Self> {
        // Donnée du capteur
        let data: Arc<Mutex<anyhow::Result<Data>>> = Arc::new(Mutex::new(Err(anyhow!("NOINIT"))));
        let data_thread = data.clone();

        let thread_token = token.clone();
        let reader = Reader { data, token };

        #[cfg(feature = "real-sensors")]
        {
            println!("[MAG] Démarrage du thread ...");
            thread::spawn(move || {
                let mut mag = match init_capteur(&options) {
                    Ok(mag) => mag,
                    Err(e) => {
                        println!("[MAG] Capteur non disponible: {}", e);
                        *data_thread.lock().unwrap() = Err(e);
                        return;
                    }
                };

                while !thread_token.is_cancelled() {
                    match mag.get_mag_axes_raw() {
                        Ok(axes) => {
                            let heading = mag.heading_from_raw(axes.x, axes.y);

                            if let Ok(true) = mag.is_overflow() {
                                println!("[MAG] Capteur en saturation.");
                            }

                            *data_thread.lock().unwrap() = Ok(Data {
                                raw: (axes.x, axes.y, axes.z),
                                heading,
                            });
                        }

                        Err(e) => {
                            *data_thread.lock().unwrap() = Err(anyhow!(e));
                        }
                    }

                    thread::sleep(Duration::from_millis(100));
                }

                println!("[MAG] Fin du thread.");
            });
        }

        #[cfg(all(feature = "fake-sensors", not(feature = "real-sensors")))]
        {
            let _ = &options;

            println!("[MAG] Démarrage du thread [FAKE] ...");
            thread::spawn(move || {
                let mut rng = rand::thread_rng();

                while !thread_token.is_cancelled() {
                    let x: i16 = rng.gen();
                    let y: i16 = rng.gen();
                    let z: i16 = rng.gen();
                    let heading: f64 = rng.gen_range(0.0..360.0);

                    *data_thread.lock().unwrap() = Ok(Data {
                        raw: (x, y, z),
                        heading,
                    });

                    thread::sleep(Duration::from_millis(100));
                }

                println!("[MAG] Fin du thread [FAKE].");
            });
        }

        #[cfg(not(any(feature = "real-sensors", feature = "fake-sensors")))]
        {
            let _ = (&options, &data_thread, &thread_token);
            println!("[MAG] Aucun backend capteur compilé.");
        }

        Ok(reader)
    }
}

/// Ouvre le bus, applique les réglages et initialise le capteur
#[cfg(feature = "real-sensors")]
fn init_capteur(options: &Options) -> anyhow::Result<QMC5883L<rppal::i2c::I2c>> {
    let i2c = crate::i2c::open(options.bus, options.address)?;

    let mut mag = QMC5883L::new(i2c);
    mag.set_config(options.config);
    mag.set_offset(options.offset.0, options.offset.1, options.offset.2);
    mag.set_mag_decl(options.mag_decl);
    mag.start()?;

    println!("[MAG] Capteur {:#04x} initialisé.", mag.get_chip_id()?);

    Ok(mag)
}

impl Stream for Reader {
    type Item = anyhow::Result<Data>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> Poll<Option<Self::Item>> {
        if self.token.is_cancelled() {
            return Poll::Ready(None);
        }

        match self.data.lock().unwrap().as_ref() {
            Ok(val) => Poll::Ready(Some(Ok(*val))),
            Err(e) => Poll::Ready(Some(Err(anyhow!("{}", e)))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructeur_present_quelles_que_soient_les_features() {
        // Le constructeur doit exister même sans backend capteur compilé
        let _: fn(CancellationToken, Options) -> anyhow::Result<Reader> = Reader::new;
    }

    #[cfg(not(any(feature = "real-sensors", feature = "fake-sensors")))]
    #[test]
    fn sans_backend_le_flux_porte_une_erreur() {
        use futures::StreamExt;

        let options = Options {
            bus: 1,
            address: 0x0D,
            config: 0,
            offset: (0, 0, 0),
            mag_decl: 0.0,
        };

        let token = CancellationToken::new();
        let mut reader = Reader::new(token.clone(), options).unwrap();

        assert!(matches!(futures::executor::block_on(reader.next()), Some(Err(_))));

        // Et se termine une fois le token annulé
        token.cancel();
        assert!(futures::executor::block_on(reader.next()).is_none());
    }
}
