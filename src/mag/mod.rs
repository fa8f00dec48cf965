use std::f64::consts::PI;
use std::thread::sleep;
use std::time::Duration;

use nalgebra::Vector3;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::i2c::I2CBus;

pub mod reader;
pub mod registry;

/// Déclinaison magnétique locale (13°17'), en radians
pub const DECLINAISON_DEFAUT: f64 = (13.0 + 17.0 / 60.0) * PI / 180.0;

// Attente du bit DRDY: jusqu'à 500 relectures espacées de 1 ms, soit
// largement plus qu'une période de mesure à la cadence minimale (10 Hz)
const POLL_ESSAIS: u32 = 500;
const POLL_INTERVALLE: Duration = Duration::from_millis(1);

// Cadence d'échantillonnage de la calibration
const CALIBRATION_INTERVALLE: Duration = Duration::from_millis(100);

/// Erreurs du pilote
#[derive(Debug, Error)]
pub enum MagError<E: std::error::Error> {
    /// Panne du transport, remontée telle quelle
    #[error("erreur du bus I2C: {0}")]
    Bus(E),

    /// Le périphérique a retourné moins d'octets que le protocole n'en demande
    #[error("lecture incomplète: {recu} octet(s) reçu(s), {attendu} attendu(s)")]
    ShortRead { attendu: usize, recu: usize },

    /// Le bit DRDY n'a pas été levé dans le délai imparti
    #[error("délai dépassé en attente des données du capteur")]
    Timeout,
}

/// Pilote du magnétomètre QMC5883L.
///
/// Le pilote possède son bus et son état (configuration, offsets) sans
/// aucune synchronisation interne: un seul propriétaire à la fois, tout
/// usage concurrent se sérialise à l'extérieur.
pub struct QMC5883L<B: I2CBus> {
    i2c: B,
    config: u8,
    offset: Vector3<i16>,
    mag_decl: f64,
    poll_essais: u32,
    poll_intervalle: Duration,
    calibration_intervalle: Duration,
}

/// Décode une rafale de 6 octets en trois axes signés, poids faible en tête
fn decode_axes(data: &[u8; 6]) -> Vector3<i16> {
    let x = ((data[1] as i16) << 8) | data[0] as i16;
    let y = ((data[3] as i16) << 8) | data[2] as i16;
    let z = ((data[5] as i16) << 8) | data[4] as i16;
    Vector3::new(x, y, z)
}

impl<B: I2CBus> QMC5883L<B> {
    /// Constructeur, sans accès au bus
    pub fn new(i2c: B) -> Self {
        Self {
            i2c,
            config: registry::QMC5883L_CONFIG_DEFAUT,
            offset: Vector3::new(0, 0, 0),
            mag_decl: DECLINAISON_DEFAUT,
            poll_essais: POLL_ESSAIS,
            poll_intervalle: POLL_INTERVALLE,
            calibration_intervalle: CALIBRATION_INTERVALLE,
        }
    }

    /// Initialise le capteur: période Set/Reset puis octet de configuration.
    /// La moindre écriture en échec interrompt l'initialisation.
    pub fn start(&mut self) -> Result<(), MagError<B::Error>> {
        self.i2c
            .write_register(registry::QMC5883L_SETRESET, registry::QMC5883L_PERIODE_DEFAUT)
            .map_err(MagError::Bus)?;

        self.i2c
            .write_register(registry::QMC5883L_SETTINGS, self.config)
            .map_err(MagError::Bus)?;

        Ok(())
    }

    /// Octet de configuration courant
    pub fn get_config(&self) -> u8 {
        self.config
    }

    /// Remplace l'octet de configuration. Prend effet au prochain `start`.
    pub fn set_config(&mut self, config: u8) {
        self.config = config;
    }

    /// Défini les offsets par axe, issus de la calibration
    pub fn set_offset(&mut self, x: i16, y: i16, z: i16) {
        self.offset = Vector3::new(x, y, z);
    }

    /// Offsets courants
    pub fn get_offset(&self) -> Vector3<i16> {
        self.offset
    }

    /// Défini la déclinaison magnétique locale, en radians
    pub fn set_mag_decl(&mut self, mag_decl: f64) {
        self.mag_decl = mag_decl;
    }

    /// Ajuste la politique d'attente du bit DRDY
    pub fn set_poll_policy(&mut self, essais: u32, intervalle: Duration) {
        self.poll_essais = essais;
        self.poll_intervalle = intervalle;
    }

    /// Ajuste la cadence d'échantillonnage de la calibration
    pub fn set_calibration_interval(&mut self, intervalle: Duration) {
        self.calibration_intervalle = intervalle;
    }

    /// Sélectionne un registre de départ puis lis le buffer en séquence
    fn read_bytes(&mut self, registre: u8, buffer: &mut [u8]) -> Result<(), MagError<B::Error>> {
        self.i2c.write(&[registre]).map_err(MagError::Bus)?;

        let recu = self.i2c.read(buffer).map_err(MagError::Bus)?;
        if recu < buffer.len() {
            return Err(MagError::ShortRead {
                attendu: buffer.len(),
                recu,
            });
        }

        Ok(())
    }

    /// Relis le registre de statut. Jamais mis en cache.
    pub fn get_status(&mut self) -> Result<u8, MagError<B::Error>> {
        let mut buffer = [0u8; 1];
        self.read_bytes(registry::QMC5883L_INFO, &mut buffer)?;
        Ok(buffer[0])
    }

    /// Identifiant du capteur
    pub fn get_chip_id(&mut self) -> Result<u8, MagError<B::Error>> {
        let mut buffer = [0u8; 1];
        self.read_bytes(registry::QMC5883L_CHIP_ID, &mut buffer)?;
        Ok(buffer[0])
    }

    /// Vérifie si le capteur est en saturation
    pub fn is_overflow(&mut self) -> Result<bool, MagError<B::Error>> {
        Ok(self.get_status()? & (1 << registry::QMC5883L_INFO_OVL_BIT) != 0)
    }

    /// Vérifie si une mesure a été écrasée avant d'être lue
    pub fn is_data_skip(&mut self) -> Result<bool, MagError<B::Error>> {
        Ok(self.get_status()? & (1 << registry::QMC5883L_INFO_DOR_BIT) != 0)
    }

    /// Attends que le capteur annonce une mesure fraîche (bit DRDY).
    ///
    /// L'attente est bornée par la politique de polling: passé le nombre
    /// d'essais configuré, retourne `Timeout` plutôt que de bloquer
    /// indéfiniment sur un capteur muet.
    pub fn wait_data_ready(&mut self) -> Result<(), MagError<B::Error>> {
        for _ in 0..self.poll_essais {
            if self.get_status()? & (1 << registry::QMC5883L_INFO_DRDY_BIT) != 0 {
                return Ok(());
            }

            sleep(self.poll_intervalle);
        }

        Err(MagError::Timeout)
    }

    /// Lecture des trois axes, avant application des offsets
    fn read_axes(&mut self) -> Result<Vector3<i16>, MagError<B::Error>> {
        self.wait_data_ready()?;

        let mut buffer = [0u8; 6];
        self.read_bytes(registry::QMC5883L_X_L, &mut buffer)?;

        Ok(decode_axes(&buffer))
    }

    /// Récupére les valeurs des trois axes, corrigées des offsets
    pub fn get_mag_axes_raw(&mut self) -> Result<Vector3<i16>, MagError<B::Error>> {
        let brut = self.read_axes()?;

        // Soustraction en complément à deux, comme sur le capteur
        Ok(Vector3::new(
            brut.x.wrapping_sub(self.offset.x),
            brut.y.wrapping_sub(self.offset.y),
            brut.z.wrapping_sub(self.offset.z),
        ))
    }

    /// Calcule le cap en degrés, dans [0, 360), à partir d'une mesure (x, y).
    ///
    /// Le facteur d'échelle dépend de la pleine échelle configurée. Il est
    /// appliqué aux deux opérandes de atan2, qui n'y est pas sensible.
    pub fn heading_from_raw(&self, x: i16, y: i16) -> f64 {
        let scale = if self.config & registry::QMC5883L_RNG_8G != 0 {
            registry::QMC5883L_SCALE_8G
        } else {
            registry::QMC5883L_SCALE_2G
        };

        let heading = (y as f64 * scale).atan2(x as f64 * scale) + self.mag_decl;

        // Ramène dans [0, 2π) quel que soit le nombre de tours
        heading.rem_euclid(2.0 * PI).to_degrees()
    }

    /// Lecture d'une mesure puis calcul du cap en degrés
    pub fn get_heading(&mut self) -> Result<f64, MagError<B::Error>> {
        let axes = self.get_mag_axes_raw()?;
        Ok(self.heading_from_raw(axes.x, axes.y))
    }

    /// Calibration du compas: faire tourner le capteur sur un tour complet
    /// pendant que cette boucle accumule les extrema des axes X et Y, puis
    /// annuler le token. Retourne les offsets symétriques `(min+max)/2`,
    /// à réinjecter via `set_offset`.
    ///
    /// Les mesures sont prises avant application des offsets courants. Les
    /// extrema partent de zéro. Une erreur de lecture met fin à la boucle
    /// en rendant le résultat accumulé jusque-là: à l'appelant de juger de
    /// sa plausibilité.
    pub fn calibrate_compass(&mut self, token: &CancellationToken) -> (i16, i16) {
        let mut min_x: i16 = 0;
        let mut max_x: i16 = 0;
        let mut min_y: i16 = 0;
        let mut max_y: i16 = 0;

        loop {
            if token.is_cancelled() {
                break;
            }

            let axes = match self.read_axes() {
                Ok(axes) => axes,
                Err(_) => break,
            };

            min_x = min_x.min(axes.x);
            max_x = max_x.max(axes.x);
            min_y = min_y.min(axes.y);
            max_y = max_y.max(axes.y);

            sleep(self.calibration_intervalle);
        }

        // Division entière, tronquée vers zéro. La somme est élargie en i32
        // pour éviter le débordement sur des extrema en bout d'échelle.
        let off_x = ((min_x as i32 + max_x as i32) / 2) as i16;
        let off_y = ((min_y as i32 + max_y as i32) / 2) as i16;

        (off_x, off_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Error)]
    #[error("panne simulée du bus")]
    struct PanneBus;

    /// Bus simulé: journal des échanges et réponses pré-chargées
    #[derive(Default)]
    struct FauxBus {
        registres: Vec<(u8, u8)>,
        selections: Vec<u8>,
        lectures: VecDeque<Result<Vec<u8>, PanneBus>>,
        panne_registre: bool,
        annulation: Option<(usize, CancellationToken)>,
    }

    impl FauxBus {
        fn new() -> Self {
            Self::default()
        }

        fn pousse_statut(&mut self, statut: u8) {
            self.lectures.push_back(Ok(vec![statut]));
        }

        fn pousse_axes(&mut self, x: i16, y: i16, z: i16) {
            let [xl, xh] = x.to_le_bytes();
            let [yl, yh] = y.to_le_bytes();
            let [zl, zh] = z.to_le_bytes();
            self.lectures.push_back(Ok(vec![xl, xh, yl, yh, zl, zh]));
        }

        fn pousse_echantillon(&mut self, x: i16, y: i16, z: i16) {
            self.pousse_statut(0x01);
            self.pousse_axes(x, y, z);
        }
    }

    impl I2CBus for FauxBus {
        type Error = PanneBus;

        fn write_register(&mut self, registre: u8, valeur: u8) -> Result<(), PanneBus> {
            if self.panne_registre {
                return Err(PanneBus);
            }
            self.registres.push((registre, valeur));
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> Result<usize, PanneBus> {
            self.selections.push(data[0]);
            Ok(data.len())
        }

        fn read(&mut self, buffer: &mut [u8]) -> Result<usize, PanneBus> {
            let reponse = self.lectures.pop_front().unwrap_or(Err(PanneBus))?;

            if let Some((restant, token)) = self.annulation.as_mut() {
                *restant -= 1;
                if *restant == 0 {
                    token.cancel();
                    self.annulation = None;
                }
            }

            let n = reponse.len().min(buffer.len());
            buffer[..n].copy_from_slice(&reponse[..n]);
            Ok(n)
        }
    }

    fn pilote(bus: FauxBus) -> QMC5883L<FauxBus> {
        let mut mag = QMC5883L::new(bus);
        mag.set_poll_policy(5, Duration::ZERO);
        mag.set_calibration_interval(Duration::ZERO);
        mag
    }

    #[test]
    fn decodage_petit_boutiste() {
        let axes = decode_axes(&[0x00, 0x80, 0xFF, 0x7F, 0x34, 0x12]);
        assert_eq!(axes, Vector3::new(-32768, 32767, 0x1234));

        let axes = decode_axes(&[0x00, 0x00, 0xFF, 0xFF, 0x01, 0x00]);
        assert_eq!(axes, Vector3::new(0, -1, 1));
    }

    #[test]
    fn start_ecrit_periode_puis_config() {
        let mut mag = pilote(FauxBus::new());
        mag.start().unwrap();

        assert_eq!(
            mag.i2c.registres,
            vec![
                (registry::QMC5883L_SETRESET, registry::QMC5883L_PERIODE_DEFAUT),
                (registry::QMC5883L_SETTINGS, registry::QMC5883L_CONFIG_DEFAUT),
            ]
        );
    }

    #[test]
    fn start_interrompu_par_panne() {
        let mut bus = FauxBus::new();
        bus.panne_registre = true;

        let mut mag = pilote(bus);
        assert!(matches!(mag.start(), Err(MagError::Bus(_))));
        assert!(mag.i2c.registres.is_empty());
    }

    #[test]
    fn statut_vide_est_une_lecture_courte() {
        let mut bus = FauxBus::new();
        bus.lectures.push_back(Ok(vec![]));

        let mut mag = pilote(bus);
        assert!(matches!(
            mag.get_status(),
            Err(MagError::ShortRead { attendu: 1, recu: 0 })
        ));
    }

    #[test]
    fn rafale_courte_est_une_lecture_courte() {
        let mut bus = FauxBus::new();
        bus.pousse_statut(0x01);
        bus.lectures.push_back(Ok(vec![0x01, 0x02, 0x03, 0x04, 0x05]));

        let mut mag = pilote(bus);
        assert!(matches!(
            mag.get_mag_axes_raw(),
            Err(MagError::ShortRead { attendu: 6, recu: 5 })
        ));
    }

    #[test]
    fn panne_du_bus_remontee_sans_relecture() {
        let mut bus = FauxBus::new();
        bus.lectures.push_back(Err(PanneBus));
        bus.pousse_statut(0x01);

        let mut mag = pilote(bus);
        assert!(matches!(mag.wait_data_ready(), Err(MagError::Bus(_))));
        // La relecture suivante n'a pas été consommée
        assert_eq!(mag.i2c.lectures.len(), 1);
    }

    #[test]
    fn attente_drdy_bornee() {
        let mut bus = FauxBus::new();
        for _ in 0..5 {
            bus.pousse_statut(0x00);
        }

        let mut mag = pilote(bus);
        assert!(matches!(mag.wait_data_ready(), Err(MagError::Timeout)));
    }

    #[test]
    fn attente_drdy_scrute_le_statut() {
        let mut bus = FauxBus::new();
        bus.pousse_statut(0x00);
        bus.pousse_statut(0x00);
        bus.pousse_statut(0x01);

        let mut mag = pilote(bus);
        mag.wait_data_ready().unwrap();
        assert_eq!(mag.i2c.selections, vec![registry::QMC5883L_INFO; 3]);
    }

    #[test]
    fn identifiant_du_capteur() {
        let mut bus = FauxBus::new();
        bus.lectures.push_back(Ok(vec![0xFF]));

        let mut mag = pilote(bus);
        assert_eq!(mag.get_chip_id().unwrap(), 0xFF);
        assert_eq!(mag.i2c.selections, vec![registry::QMC5883L_CHIP_ID]);
    }

    #[test]
    fn bits_de_statut_saturation_et_ecrasement() {
        let mut bus = FauxBus::new();
        bus.pousse_statut(1 << registry::QMC5883L_INFO_OVL_BIT);
        bus.pousse_statut(1 << registry::QMC5883L_INFO_DRDY_BIT);
        bus.pousse_statut(1 << registry::QMC5883L_INFO_DOR_BIT);
        bus.pousse_statut(1 << registry::QMC5883L_INFO_DRDY_BIT);

        let mut mag = pilote(bus);
        assert!(mag.is_overflow().unwrap());
        assert!(!mag.is_overflow().unwrap());
        assert!(mag.is_data_skip().unwrap());
        assert!(!mag.is_data_skip().unwrap());
    }

    #[test]
    fn lecture_applique_les_offsets() {
        let mut bus = FauxBus::new();
        bus.pousse_echantillon(1000, -500, 250);
        bus.pousse_echantillon(1000, -500, 250);

        let mut mag = pilote(bus);
        mag.set_offset(10, -20, 30);
        assert_eq!(mag.get_mag_axes_raw().unwrap(), Vector3::new(990, -480, 220));

        // Offset nul: aucune correction
        mag.set_offset(0, 0, 0);
        assert_eq!(mag.get_mag_axes_raw().unwrap(), Vector3::new(1000, -500, 250));
    }

    #[test]
    fn cap_pur_et_borne() {
        let mag = pilote(FauxBus::new());

        for (x, y) in [(100, 100), (-100, 100), (100, -100), (-100, -100), (0, 1), (1, 0)] {
            let cap = mag.heading_from_raw(x, y);
            assert!((0.0..360.0).contains(&cap), "cap hors plage: {}", cap);
            assert_eq!(cap, mag.heading_from_raw(x, y));
        }
    }

    #[test]
    fn cap_a_l_origine_defini() {
        let mag = pilote(FauxBus::new());

        // atan2(0, 0) vaut 0 par convention, reste la déclinaison
        let cap = mag.heading_from_raw(0, 0);
        assert!((cap - (13.0 + 17.0 / 60.0)).abs() < 1e-9);
    }

    #[test]
    fn cap_nord_est_connu() {
        let mag = pilote(FauxBus::new());

        // atan2(1, 1) = 45°, plus 13°17' de déclinaison
        let cap = mag.heading_from_raw(100, 100);
        assert!((cap - (45.0 + 13.0 + 17.0 / 60.0)).abs() < 1e-6);
    }

    #[test]
    fn cap_insensible_a_la_pleine_echelle() {
        // Le facteur d'échelle est commun aux deux opérandes de atan2:
        // l'angle ne dépend pas de la pleine échelle configurée.
        let mut mag = pilote(FauxBus::new());

        mag.set_config(registry::QMC5883L_CONTINUOUS | registry::QMC5883L_RNG_2G);
        let cap_2g = mag.heading_from_raw(123, -456);

        mag.set_config(registry::QMC5883L_CONTINUOUS | registry::QMC5883L_RNG_8G);
        let cap_8g = mag.heading_from_raw(123, -456);

        assert!((cap_2g - cap_8g).abs() < 1e-9);
    }

    #[test]
    fn calibration_rend_les_offsets_symetriques() {
        let mut bus = FauxBus::new();
        bus.pousse_echantillon(-100, 30, 7);
        bus.pousse_echantillon(150, -60, -7);
        bus.pousse_echantillon(20, 10, 0);
        // File épuisée: la lecture suivante échoue et termine la boucle

        let mut mag = pilote(bus);
        // Les offsets courants ne doivent pas fausser la calibration
        mag.set_offset(1000, 1000, 1000);

        let token = CancellationToken::new();
        assert_eq!(mag.calibrate_compass(&token), (25, -15));
    }

    #[test]
    fn calibration_annulee_avant_lancement() {
        let token = CancellationToken::new();
        token.cancel();

        let mut mag = pilote(FauxBus::new());
        assert_eq!(mag.calibrate_compass(&token), (0, 0));
        assert!(mag.i2c.selections.is_empty());
    }

    #[test]
    fn calibration_s_arrete_une_iteration_apres_annulation() {
        let token = CancellationToken::new();

        let mut bus = FauxBus::new();
        bus.pousse_echantillon(10, -10, 0);
        bus.pousse_echantillon(60, 20, 0);
        // Annulation levée pendant la lecture du deuxième échantillon
        bus.annulation = Some((4, token.clone()));
        // De quoi continuer indéfiniment si l'annulation était ignorée
        bus.pousse_echantillon(30000, 30000, 0);
        bus.pousse_echantillon(30000, 30000, 0);

        let mut mag = pilote(bus);
        assert_eq!(mag.calibrate_compass(&token), (30, 5));
        // Les échantillons suivants n'ont pas été consommés
        assert_eq!(mag.i2c.lectures.len(), 4);
    }
}
