//! Prometheus metrics for the HTTP surface and the classifier.

use std::time::Duration;

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

use crate::model::Prediction;
use crate::plant::Plant;

const LATENCY_BUCKETS: [f64; 10] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
    predictions: IntCounterVec,
    prediction_latency: Histogram,
    switches: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by route and status"),
            &["route", "status"],
        )?;
        let predictions = IntCounterVec::new(
            Opts::new(
                "plant_predictions_total",
                "Successful predictions by plant and verdict",
            ),
            &["plant", "prediction"],
        )?;
        let prediction_latency = Histogram::with_opts(
            HistogramOpts::new(
                "plant_prediction_duration_seconds",
                "Time spent in the forward pass",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let switches = IntCounterVec::new(
            Opts::new("plant_model_switches_total", "Completed plant switches"),
            &["plant"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(predictions.clone()))?;
        registry.register(Box::new(prediction_latency.clone()))?;
        registry.register(Box::new(switches.clone()))?;

        Ok(Self {
            registry,
            requests,
            predictions,
            prediction_latency,
            switches,
        })
    }

    pub fn observe_request(&self, route: &str, status: u16) {
        let status = status.to_string();
        self.requests
            .with_label_values(&[route, status.as_str()])
            .inc();
    }

    pub fn observe_prediction(&self, prediction: &Prediction, elapsed: Duration) {
        self.predictions
            .with_label_values(&[
                prediction.plant_type.as_str(),
                prediction.prediction.as_str(),
            ])
            .inc();
        self.prediction_latency.observe(elapsed.as_secs_f64());
    }

    pub fn observe_switch(&self, plant: Plant) {
        self.switches.with_label_values(&[plant.as_str()]).inc();
    }

    /// Renders every metric in the Prometheus text exposition format.
    pub fn render(&self) -> Result<(String, String), prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;

        let body = String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("metrics are not UTF-8: {}", e)))?;
        Ok((encoder.format_type().to_string(), body))
    }
}
