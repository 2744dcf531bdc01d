use serde::{Deserialize, Serialize};

use crate::judgement::Judgement;

/// Combo length that earns one extra 10% of base score.
pub const COMBO_TIER: u32 = 10;

/// Accumulated statistics for one play session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GameStats {
    pub score: u64,
    pub combo: u32,
    pub max_combo: u32,
    pub perfects: u32,
    pub goods: u32,
    pub misses: u32,
    /// Percentage in [0, 100]; stays at its last value while nothing is judged.
    pub accuracy: f64,
    pub total_notes: u32,
    pub hit_notes: u32,
}

impl GameStats {
    pub fn new(total_notes: u32) -> Self {
        Self {
            total_notes,
            ..Default::default()
        }
    }

    pub fn judged(&self) -> u32 {
        self.perfects + self.goods + self.misses
    }

    /// Score gained by `judgement` at the current combo, before the combo
    /// itself is updated.
    pub fn gain_for(&self, judgement: Judgement) -> u64 {
        let tier = u64::from(self.combo / COMBO_TIER);
        judgement.base_score() * (10 + tier) / 10
    }

    /// Applies one resolution and returns the score it earned.
    pub fn record(&mut self, judgement: Judgement) -> u64 {
        let gain = self.gain_for(judgement);
        self.score += gain;

        match judgement {
            Judgement::Perfect => self.perfects += 1,
            Judgement::Good => self.goods += 1,
            Judgement::Miss => self.misses += 1,
        }

        if judgement.is_hit() {
            self.combo += 1;
            self.hit_notes += 1;
            self.max_combo = self.max_combo.max(self.combo);
        } else {
            self.combo = 0;
        }

        self.refresh_accuracy();
        gain
    }

    /// Counts `count` targets as missed in one go, as happens when the song
    /// ends with targets still open.
    pub fn record_misses(&mut self, count: u32) {
        if count == 0 {
            return;
        }
        self.misses += count;
        self.combo = 0;
        self.refresh_accuracy();
    }

    fn refresh_accuracy(&mut self) {
        let judged = u64::from(self.judged());
        if judged == 0 {
            return;
        }
        let weighted = u64::from(self.perfects) * Judgement::Perfect.accuracy_weight()
            + u64::from(self.goods) * Judgement::Good.accuracy_weight();
        self.accuracy = (100.0 * weighted as f64 / (judged * 100) as f64).round();
    }
}
