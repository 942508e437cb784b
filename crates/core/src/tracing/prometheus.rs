//! Prometheus metrics export
//!
//! Histograms are exported as summaries since only windowed quantiles are kept.

use std::fmt::Write;

use crate::tracing::metrics::{self, Metrics};

/// Export metrics in Prometheus text format
pub fn export_prometheus(metrics: &Metrics) -> String {
    let mut output = String::new();

    for (name, value) in metrics.all_counters() {
        let _ = writeln!(&mut output, "# TYPE {name} counter\n{name} {value}");
    }

    for (name, value) in metrics.all_gauges() {
        let _ = writeln!(&mut output, "# TYPE {name} gauge\n{name} {value}");
    }

    for (name, stats) in metrics.all_histograms() {
        let _ = writeln!(&mut output, "# TYPE {name} summary");
        let _ = writeln!(&mut output, "{name}{{quantile=\"0.5\"}} {}", stats.p50);
        let _ = writeln!(&mut output, "{name}{{quantile=\"0.9\"}} {}", stats.p90);
        let _ = writeln!(&mut output, "{name}{{quantile=\"0.99\"}} {}", stats.p99);
        let _ = writeln!(&mut output, "{name}_sum {}", stats.sum);
        let _ = writeln!(&mut output, "{name}_count {}", stats.count);
    }

    output
}

/// Export global metrics in Prometheus format
pub fn prometheus_format() -> String {
    export_prometheus(metrics::global())
}
