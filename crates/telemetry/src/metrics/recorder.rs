use std::time::Instant;

use opentelemetry::{Key, KeyValue, Value, metrics::Histogram};

/// Times one operation into a histogram.
///
/// The clock starts when the recorder is created. Calling [`Recorder::record`] writes the
/// elapsed milliseconds together with the collected attributes.
///
/// ```
/// use telemetry::metrics::{Recorder, evaluation_duration};
///
/// let histogram = evaluation_duration();
///
/// let mut recorder = Recorder::start(&histogram);
/// recorder.push_attribute("mode", "admission");
/// recorder.push_attribute("outcome", "admitted");
/// recorder.record();
/// ```
pub struct Recorder {
    start: Instant,
    histogram: Histogram<f64>,
    attributes: Vec<KeyValue>,
}

impl Recorder {
    /// Starts timing into `histogram`.
    pub fn start(histogram: &Histogram<f64>) -> Self {
        Self {
            start: Instant::now(),
            histogram: histogram.clone(),
            attributes: Vec::with_capacity(3),
        }
    }

    /// Adds an attribute to be recorded with the metric.
    pub fn push_attribute<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        self.attributes.push(KeyValue::new(key, value));
    }

    /// Records the elapsed time to the histogram.
    pub fn record(self) {
        let duration = self.start.elapsed().as_secs_f64() * 1000.0;
        self.histogram.record(duration, &self.attributes);
    }
}
