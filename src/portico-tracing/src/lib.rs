use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::{fmt, prelude::*, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the OTLP pipeline alive; flushes pending spans on shutdown.
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl TracingGuard {
    pub fn shutdown(self) {
        if let Some(provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("tracer provider shutdown failed: {e}");
            }
        }
    }
}

/// `RUST_LOG` wins over the configured level; an unparsable level falls back to `info`.
fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn console_layer(format: &str, level: &str) -> BoxedLayer {
    match format {
        "json" => fmt::layer()
            .json()
            .with_current_span(true)
            .with_thread_ids(true)
            .with_filter(filter(level))
            .boxed(),
        "pretty" => fmt::layer().pretty().with_filter(filter(level)).boxed(),
        _ => fmt::layer().with_target(true).with_filter(filter(level)).boxed(),
    }
}

fn otlp_provider(service_name: &str, endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .with_context(|| format!("build OTLP exporter for {endpoint}"))?;
    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .with_attributes([KeyValue::new("service.version", env!("CARGO_PKG_VERSION"))])
        .build();
    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

/// Installs the global subscriber: a console layer in `plain`, `pretty` or
/// `json` format, plus span export over OTLP when `otlp_endpoint` is set.
pub fn init(
    service_name: &str,
    otlp_endpoint: Option<&str>,
    level: &str,
    format: &str,
) -> Result<TracingGuard> {
    let provider = otlp_endpoint
        .filter(|e| !e.is_empty())
        .map(|endpoint| otlp_provider(service_name, endpoint))
        .transpose()?;

    let otel_layer = provider.as_ref().map(|p| {
        OpenTelemetryLayer::new(p.tracer(service_name.to_string())).with_filter(filter(level))
    });

    Registry::default()
        .with(console_layer(format, level))
        .with(otel_layer)
        .try_init()
        .context("install tracing subscriber")?;

    Ok(TracingGuard { provider })
}
