//! AdamW optimizer and learning rate schedule for classifier fine-tuning.

use anyhow::Result;
use candle_core::backprop::GradStore;
use candle_core::Var;
use candle_nn::optim::{Optimizer, ParamsAdamW};
use candle_nn::VarMap;

/// AdamW optimizer configuration
#[derive(Debug, Clone)]
pub struct AdamWConfig {
    /// Learning rate
    pub lr: f64,
    /// Beta1 (first moment decay)
    pub beta1: f64,
    /// Beta2 (second moment decay)
    pub beta2: f64,
    /// Epsilon for numerical stability
    pub eps: f64,
    /// Weight decay coefficient
    pub weight_decay: f64,
    /// Gradients are rescaled when their global L2 norm exceeds this
    pub max_grad_norm: f64,
}

impl Default for AdamWConfig {
    fn default() -> Self {
        Self {
            lr: 5e-5,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.01,
            max_grad_norm: 1.0,
        }
    }
}

/// AdamW optimizer over the trainable variables of a `VarMap`
pub struct AdamW {
    inner: candle_nn::optim::AdamW,
    vars: Vec<Var>,
    config: AdamWConfig,
    step_count: usize,
}

impl AdamW {
    pub fn new(var_map: &VarMap, config: AdamWConfig) -> Result<Self> {
        let params = ParamsAdamW {
            lr: config.lr,
            beta1: config.beta1,
            beta2: config.beta2,
            eps: config.eps,
            weight_decay: config.weight_decay,
        };

        let vars = var_map.all_vars();
        let inner = candle_nn::optim::AdamW::new(vars.clone(), params)?;

        Ok(Self {
            inner,
            vars,
            config,
            step_count: 0,
        })
    }

    /// Performs an optimization step without gradient clipping.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.inner.step(grads)?;
        self.step_count += 1;
        Ok(())
    }

    /// Rescales gradients to `max_grad_norm` when their global L2 norm
    /// exceeds it, then steps. Returns the pre-clip norm.
    pub fn step_clipped(&mut self, grads: &mut GradStore) -> Result<f64> {
        let total_norm = compute_grad_norm(grads, &self.vars)?;

        if total_norm > self.config.max_grad_norm {
            let scale = self.config.max_grad_norm / (total_norm + 1e-6);
            for var in &self.vars {
                if let Some(grad) = grads.remove(var) {
                    grads.insert(var, (grad * scale)?);
                }
            }
        }

        self.inner.step(grads)?;
        self.step_count += 1;
        Ok(total_norm)
    }

    pub fn learning_rate(&self) -> f64 {
        self.config.lr
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.config.lr = lr;
        self.inner.set_learning_rate(lr);
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }
}

/// Linear warmup followed by linear decay to zero
pub struct LearningRateScheduler {
    base_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
    current_step: usize,
}

impl LearningRateScheduler {
    pub fn new(base_lr: f64, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            base_lr,
            warmup_steps,
            total_steps,
            current_step: 0,
        }
    }

    /// Learning rate for the current step.
    pub fn get_lr(&self) -> f64 {
        if self.current_step < self.warmup_steps {
            return self.base_lr * (self.current_step as f64 / self.warmup_steps.max(1) as f64);
        }

        let remaining = self.total_steps.saturating_sub(self.current_step) as f64;
        let decay_span = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
        self.base_lr * (remaining / decay_span).clamp(0.0, 1.0)
    }

    /// Steps the scheduler and returns the new learning rate.
    pub fn step(&mut self) -> f64 {
        self.current_step += 1;
        self.get_lr()
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }
}

/// Global L2 norm over all gradients in the store
pub fn compute_grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f64> {
    let mut total_norm_sq: f64 = 0.0;

    for var in vars {
        if let Some(grad) = grads.get(var) {
            let grad_norm_sq = grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
            total_norm_sq += grad_norm_sq as f64;
        }
    }

    Ok(total_norm_sq.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::Init;

    #[test]
    fn test_lr_scheduler_warmup() {
        let mut scheduler = LearningRateScheduler::new(1e-4, 100, 1000);
        assert_eq!(scheduler.get_lr(), 0.0);

        for _ in 0..50 {
            scheduler.step();
        }
        assert!((scheduler.get_lr() - 0.5e-4).abs() < 1e-10);

        for _ in 0..50 {
            scheduler.step();
        }
        // warmup ends exactly at base lr
        assert!((scheduler.get_lr() - 1e-4).abs() < 1e-10);
    }

    #[test]
    fn test_lr_scheduler_linear_decay() {
        let mut scheduler = LearningRateScheduler::new(1e-4, 0, 1000);
        assert!((scheduler.get_lr() - 1e-4).abs() < 1e-10);

        for _ in 0..500 {
            scheduler.step();
        }
        assert!((scheduler.get_lr() - 0.5e-4).abs() < 1e-10);

        for _ in 0..500 {
            scheduler.step();
        }
        assert_eq!(scheduler.get_lr(), 0.0);

        // never negative past the end
        scheduler.step();
        assert_eq!(scheduler.get_lr(), 0.0);
    }

    #[test]
    fn test_adamw_step_moves_vars() {
        let device = Device::Cpu;
        let var_map = VarMap::new();
        let w = var_map
            .get((2, 2), "w", Init::Const(1.0), DType::F32, &device)
            .unwrap();

        let config = AdamWConfig {
            lr: 0.1,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(&var_map, config).unwrap();

        let loss = w.sqr().unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        optimizer.step(&grads).unwrap();

        let updated = var_map.all_vars()[0].to_vec2::<f32>().unwrap();
        for row in updated {
            for value in row {
                assert!(value < 1.0);
                assert!(value > 0.5);
            }
        }
        assert_eq!(optimizer.step_count(), 1);
    }

    #[test]
    fn test_clipped_step_reports_norm() {
        let device = Device::Cpu;
        let var_map = VarMap::new();
        let w = var_map
            .get((4, 4), "w", Init::Const(1.0), DType::F32, &device)
            .unwrap();

        let mut optimizer = AdamW::new(&var_map, AdamWConfig::default()).unwrap();

        // (1000 * w)^2 produces gradients far above max_grad_norm
        let scaled = (&w * 1000.0).unwrap();
        let loss = scaled.sqr().unwrap().sum_all().unwrap();
        let mut grads = loss.backward().unwrap();

        let norm = optimizer.step_clipped(&mut grads).unwrap();
        assert!(norm > 1.0);
        assert!(norm.is_finite());
    }
}
