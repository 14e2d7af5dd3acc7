use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

/// Process-local worker metrics
pub struct WorkerMetrics {
    pub registry: Registry,
    pub tasks_processed: IntCounter,
    pub tasks_errors: IntCounter,
    pub tasks_in_flight: IntGauge,
    pub task_duration: Histogram,
}

impl WorkerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let tasks_processed =
            IntCounter::new("worker_tasks_processed_total", "Total tasks processed")?;
        registry.register(Box::new(tasks_processed.clone()))?;

        let tasks_errors = IntCounter::new("worker_tasks_errors_total", "Total processing errors")?;
        registry.register(Box::new(tasks_errors.clone()))?;

        let tasks_in_flight = IntGauge::new("worker_tasks_in_flight", "Handlers currently running")?;
        registry.register(Box::new(tasks_in_flight.clone()))?;

        let task_duration = Histogram::with_opts(HistogramOpts::new(
            "worker_task_duration_seconds",
            "Time from delivery to terminal outcome",
        ))?;
        registry.register(Box::new(task_duration.clone()))?;

        Ok(WorkerMetrics {
            registry,
            tasks_processed,
            tasks_errors,
            tasks_in_flight,
            task_duration,
        })
    }

    /// Track one running handler until the guard drops
    pub fn in_flight(&self) -> InFlightGuard {
        self.tasks_in_flight.inc();
        InFlightGuard {
            gauge: self.tasks_in_flight.clone(),
        }
    }
}

pub struct InFlightGuard {
    gauge: IntGauge,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_guard() {
        let metrics = WorkerMetrics::new().unwrap();
        {
            let _a = metrics.in_flight();
            let _b = metrics.in_flight();
            assert_eq!(metrics.tasks_in_flight.get(), 2);
        }
        assert_eq!(metrics.tasks_in_flight.get(), 0);
    }

    #[test]
    fn test_metric_names() {
        let metrics = WorkerMetrics::new().unwrap();
        metrics.tasks_processed.inc();
        metrics.task_duration.observe(0.01);

        let names: Vec<_> = metrics
            .registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"worker_tasks_processed_total".to_string()));
        assert!(names.contains(&"worker_task_duration_seconds".to_string()));
    }
}
