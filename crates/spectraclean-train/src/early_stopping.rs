/// Stops training once validation loss has not strictly improved for
/// `patience` consecutive epochs.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    counter: usize,
    best_loss: f64,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        EarlyStopping {
            patience,
            counter: 0,
            best_loss: f64::INFINITY,
        }
    }

    /// Record one epoch's validation loss. Returns `true` on a new best.
    pub fn step(&mut self, val_loss: f64) -> bool {
        if val_loss < self.best_loss {
            self.best_loss = val_loss;
            self.counter = 0;
            true
        } else {
            self.counter += 1;
            false
        }
    }

    pub fn should_stop(&self) -> bool {
        self.counter >= self.patience
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    pub fn counter(&self) -> usize {
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stops_patience_epochs_after_last_improvement() {
        let mut es = EarlyStopping::new(3);
        let losses = [1.0, 0.8, 0.9, 0.85, 0.8, 0.7];
        let mut stopped_at = None;
        for (epoch, &loss) in losses.iter().enumerate() {
            es.step(loss);
            if es.should_stop() {
                stopped_at = Some(epoch);
                break;
            }
        }
        // Last improvement at epoch 1; equal loss at epoch 4 is not an improvement.
        assert_eq!(stopped_at, Some(4));
        assert_eq!(es.best_loss(), 0.8);
    }

    #[test]
    fn test_improvement_resets_counter() {
        let mut es = EarlyStopping::new(2);
        assert!(es.step(1.0));
        assert!(!es.step(1.5));
        assert_eq!(es.counter(), 1);
        assert!(es.step(0.5));
        assert_eq!(es.counter(), 0);
        assert!(!es.should_stop());
    }

    #[test]
    fn test_nan_never_improves() {
        let mut es = EarlyStopping::new(1);
        assert!(!es.step(f64::NAN));
        assert!(es.should_stop());
        assert!(es.best_loss().is_infinite());
    }
}
