use log::info;

/// Reduce LR on plateau: reduce when a metric has stopped improving.
///
/// A step counts as an improvement when the metric drops below
/// `best * (1 - threshold)`. After more than `patience` consecutive
/// non-improving steps the rate is multiplied by `factor` (floored at
/// `min_lr`) and the counter restarts.
pub struct ReduceLROnPlateau {
    pub lr: f64,
    pub factor: f64,
    pub patience: usize,
    pub threshold: f64,
    pub min_lr: f64,
    best_metric: f64,
    epochs_without_improvement: usize,
}

impl ReduceLROnPlateau {
    pub fn new(initial_lr: f64, factor: f64, patience: usize) -> Self {
        ReduceLROnPlateau {
            lr: initial_lr,
            factor,
            patience,
            threshold: 1e-4,
            min_lr: 1e-7,
            best_metric: f64::INFINITY,
            epochs_without_improvement: 0,
        }
    }

    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }

    /// Call with current metric value (lower is better, e.g., loss).
    /// Returns `true` when the learning rate was reduced.
    pub fn step(&mut self, metric: f64) -> bool {
        if metric < self.best_metric * (1.0 - self.threshold) {
            self.best_metric = metric;
            self.epochs_without_improvement = 0;
            return false;
        }

        self.epochs_without_improvement += 1;
        if self.epochs_without_improvement > self.patience {
            let reduced = (self.lr * self.factor).max(self.min_lr);
            self.epochs_without_improvement = 0;
            if reduced < self.lr {
                info!("reducing learning rate {:.3e} -> {:.3e}", self.lr, reduced);
                self.lr = reduced;
                return true;
            }
        }
        false
    }

    pub fn get_lr(&self) -> f64 { self.lr }

    pub fn best(&self) -> f64 { self.best_metric }
}
