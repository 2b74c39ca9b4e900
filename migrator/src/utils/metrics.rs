use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};

pub static MIGRATOR_METRICS: Lazy<MigratorMetrics> = Lazy::new(MigratorMetrics::register);

pub struct MigratorMetrics {
    pub migration_runs: Counter<u64>,
    pub migration_step_duration: Histogram<f64>,
    pub db_calls_response_time: Histogram<f64>,
}

impl MigratorMetrics {
    pub fn register() -> Self {
        let meter: Meter = global::meter("crates.migrator.opentelemetry");

        let migration_runs = meter
            .u64_counter("migration_runs")
            .with_description("Count of migration driver invocations by outcome")
            .with_unit("runs")
            .build();

        let migration_step_duration = meter
            .f64_histogram("migration_step_duration")
            .with_description("Time taken by a single migration step")
            .with_unit("s")
            .build();

        let db_calls_response_time = meter
            .f64_histogram("db_calls_response_time")
            .with_description("Response time of DB calls over time")
            .with_unit("s")
            .build();

        Self { migration_runs, migration_step_duration, db_calls_response_time }
    }
}
