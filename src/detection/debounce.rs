/// デバウンスの出力
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSignal {
    None,
    /// 連続 N フレームの苦痛を確認（1回だけ）
    Confirmed,
    /// 確認済み状態で最初の正常フレーム
    Cleared,
}

/// フレームごとの判定を安定した「確認 / 解除」信号に変換する。
///
/// 確認には閾値分の連続フレームが必要だが、解除は正常フレーム1つで即座に行う。
/// どちらかを出したらカウンタは両方リセット。
#[derive(Debug, Clone)]
pub struct DebounceGate {
    threshold: u32,
    distress_count: u32,
    clear_count: u32,
    confirmed: bool,
}

impl DebounceGate {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            distress_count: 0,
            clear_count: 0,
            confirmed: false,
        }
    }

    pub fn observe(&mut self, is_distress: bool) -> GateSignal {
        if is_distress {
            self.clear_count = 0;
            if self.confirmed {
                return GateSignal::None;
            }
            self.distress_count = self.distress_count.saturating_add(1);
            if self.distress_count >= self.threshold {
                self.confirmed = true;
                self.reset_counters();
                return GateSignal::Confirmed;
            }
        } else {
            self.distress_count = 0;
            if self.confirmed {
                self.confirmed = false;
                self.reset_counters();
                return GateSignal::Cleared;
            }
            self.clear_count = self.clear_count.saturating_add(1);
        }
        GateSignal::None
    }

    pub fn reset(&mut self) {
        self.confirmed = false;
        self.reset_counters();
    }

    fn reset_counters(&mut self) {
        self.distress_count = 0;
        self.clear_count = 0;
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// 確認までの進捗（表示用）
    pub fn progress(&self) -> (u32, u32) {
        (self.distress_count, self.threshold)
    }

    pub fn clear_streak(&self) -> u32 {
        self.clear_count
    }
}
