use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use rcboussole::cli::Cli;
use rcboussole::mag;

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    let token = CancellationToken::new();

    // Arrêt propre sur Ctrl-C
    {
        let token = token.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            println!("[MAIN] Arrêt demandé ...");
            token.cancel();
        });
    }

    let config = match args.config_byte() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[MAIN] Configuration invalide: {}", e);
            return;
        }
    };

    if args.calibrate {
        #[cfg(feature = "real-sensors")]
        calibration(&args, config, token).await;

        #[cfg(not(feature = "real-sensors"))]
        eprintln!("[MAIN] La calibration demande un capteur réel (feature real-sensors).");

        return;
    }

    // Lecture du cap en continu
    let options = mag::reader::Options {
        bus: args.bus,
        address: args.address,
        config,
        offset: (args.offset_x, args.offset_y, args.offset_z),
        mag_decl: args.declination_radians(),
    };

    let mut reader = match mag::reader::Reader::new(token.clone(), options) {
        Ok(reader) => reader,
        Err(e) => {
            eprintln!("[MAG] Erreur d'initialisation: {}", e);
            return;
        }
    };

    while !token.is_cancelled() {
        if let Some(data) = reader.next().await {
            match data {
                Ok(data) => println!("[MAG] Cap: {:.1}° (raw: {:?})", data.heading, data.raw),
                Err(e) => eprintln!("[MAG] Erreur de lecture: {}", e),
            }
        }

        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }
}

/// Session de calibration: la boucle d'échantillonnage tourne en tâche de
/// fond pendant que l'utilisateur fait pivoter le capteur sur 360°, puis
/// Entrée met fin à la collecte.
#[cfg(feature = "real-sensors")]
async fn calibration(args: &Cli, config: u8, token: CancellationToken) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let cal_token = token.child_token();

    let bus = args.bus;
    let address = args.address;
    let thread_token = cal_token.clone();
    let collecte = tokio::task::spawn_blocking(move || -> anyhow::Result<(i16, i16)> {
        let i2c = rcboussole::i2c::open(bus, address)?;

        let mut mag = mag::QMC5883L::new(i2c);
        mag.set_config(config);
        mag.start()?;

        Ok(mag.calibrate_compass(&thread_token))
    });

    println!("[CAL] Faites tourner le capteur sur 360°, puis appuyez sur Entrée.");

    let mut lignes = BufReader::new(tokio::io::stdin()).lines();
    tokio::select! {
        _ = lignes.next_line() => {}
        _ = token.cancelled() => {}
    }
    cal_token.cancel();

    match collecte.await {
        Ok(Ok((off_x, off_y))) => {
            println!("[CAL] Offsets: X {} Y {}", off_x, off_y);
            println!("[CAL] Relancez avec --offset-x {} --offset-y {}", off_x, off_y);
        }
        Ok(Err(e)) => eprintln!("[CAL] Erreur: {}", e),
        Err(e) => eprintln!("[CAL] Tâche interrompue: {}", e),
    }
}
