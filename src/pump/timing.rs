//! Cadence de la boucle d'émulation : rendu vidéo et rattrapage du retard

/// Période de rafraîchissement de l'écran par défaut
pub const SCREEN_REFRESH_PERIOD: f64 = 1.0 / 60.0;

/// Nombre maximal de trames sautées en une fois
pub const MAX_FRAMES_TO_SKIP: u32 = 5;

/// Trames de retard de l'émulation sur l'horloge, bornées à `max`
pub fn frames_to_skip(now: f64, emulation_time: f64, frame_duration: f64, max: u32) -> u32 {
    if !(frame_duration > 0.0) || !(now > emulation_time) {
        return 0;
    }

    let behind = ((now - emulation_time) / frame_duration).floor();
    behind.min(max as f64) as u32
}

/// État temporel de la boucle, possédé par le thread d'émulation
#[derive(Debug, Clone)]
pub struct FrameTiming {
    frame_duration: f64,

    /// Horloge virtuelle de l'émulation (secondes absolues)
    emulation_time: f64,

    /// Temps accumulé depuis le dernier rendu vidéo
    counter: f64,

    refresh_period: f64,
    max_frames_to_skip: u32,
}

impl FrameTiming {
    pub fn new(refresh_period: f64, max_frames_to_skip: u32) -> Self {
        Self {
            frame_duration: 0.0,
            emulation_time: 0.0,
            counter: 0.0,
            refresh_period,
            max_frames_to_skip,
        }
    }

    /// Recale l'horloge virtuelle sur `now`
    pub fn reset(&mut self, now: f64) {
        self.emulation_time = now;
        self.counter = 0.0;
    }

    pub fn frame_duration(&self) -> f64 {
        self.frame_duration
    }

    pub fn emulation_time(&self) -> f64 {
        self.emulation_time
    }

    /// Prochaine échéance d'attente
    pub fn deadline(&self) -> f64 {
        self.emulation_time
    }

    /// Retourne `true` si la durée a changé ; l'accumulateur repart alors de zéro
    pub fn update_frame_duration(&mut self, frame_duration: f64) -> bool {
        if frame_duration == self.frame_duration {
            return false;
        }

        self.frame_duration = frame_duration;
        self.counter = 0.0;
        true
    }

    /// Accumule une trame et indique si la vidéo doit être rendue
    pub fn should_render(&mut self) -> bool {
        self.counter += self.frame_duration;
        if self.counter >= self.refresh_period {
            self.counter = 0.0;
            true
        } else {
            false
        }
    }

    /// Avance l'horloge virtuelle d'une trame
    pub fn advance(&mut self) {
        self.emulation_time += self.frame_duration;
    }

    /// Trames à exécuter sans rendu pour rattraper `now`
    ///
    /// Dès qu'un retard est constaté, l'horloge virtuelle est recalée sur
    /// `now`. Le rattrapage n'a lieu qu'à vitesse normale.
    pub fn catch_up(&mut self, now: f64, rate: f64) -> u32 {
        let frames = frames_to_skip(
            now,
            self.emulation_time,
            self.frame_duration,
            self.max_frames_to_skip,
        );

        if frames == 0 {
            return 0;
        }

        self.emulation_time = now;
        if rate == 1.0 {
            frames
        } else {
            0
        }
    }
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self::new(SCREEN_REFRESH_PERIOD, MAX_FRAMES_TO_SKIP)
    }
}
