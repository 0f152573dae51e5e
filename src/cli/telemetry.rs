//! Logging and optional OpenTelemetry trace export.
//!
//! The `fmt` layer is always installed. Spans are also exported over OTLP/gRPC
//! when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use anyhow::{Context, Result, anyhow};
use once_cell::sync::OnceCell;
use opentelemetry::{
    KeyValue, global, propagation::TextMapCompositePropagator, trace::TracerProvider as _,
};
use opentelemetry_otlp::{Compression, SpanExporter, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
};
use std::{env, time::Duration};
use tonic::{
    metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt};
use ulid::Ulid;

use super::commands::logging::LogFormat;

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Exporter settings taken from the standard `OTEL_*` variables.
#[derive(Debug)]
struct OtlpSettings {
    endpoint: String,
    metadata: MetadataMap,
    instance_id: String,
}

impl OtlpSettings {
    /// `None` when no collector endpoint is configured.
    fn from_env() -> Result<Option<Self>> {
        let Ok(endpoint) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
            return Ok(None);
        };
        let metadata = match env::var("OTEL_EXPORTER_OTLP_HEADERS") {
            Ok(raw) => parse_metadata(&raw)?,
            Err(_) => MetadataMap::new(),
        };
        Ok(Some(Self {
            endpoint: with_scheme(&endpoint),
            metadata,
            instance_id: env::var("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|_| Ulid::new().to_string()),
        }))
    }

    /// Host name to verify when the collector is reached over TLS.
    fn tls_domain(&self) -> Option<&str> {
        let authority = self.endpoint.strip_prefix("https://")?.split('/').next()?;
        authority.split(':').next().filter(|host| !host.is_empty())
    }

    fn tracer(self) -> Result<Tracer> {
        let mut exporter = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&self.endpoint)
            .with_compression(Compression::Gzip)
            .with_timeout(EXPORT_TIMEOUT);
        if let Some(domain) = self.tls_domain() {
            exporter = exporter.with_tls_config(
                ClientTlsConfig::new()
                    .domain_name(domain.to_string())
                    .with_native_roots(),
            );
        }
        if !self.metadata.is_empty() {
            exporter = exporter.with_metadata(self.metadata);
        }
        let exporter = exporter.build().context("failed to build OTLP exporter")?;

        let resource = Resource::builder_empty()
            .with_attributes([
                KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("service.instance.id", self.instance_id),
            ])
            .build();
        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build();

        let _ = TRACER_PROVIDER.set(provider.clone());
        global::set_tracer_provider(provider.clone());
        global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]));

        Ok(provider.tracer(env!("CARGO_PKG_NAME")))
    }
}

/// Collectors without a scheme are assumed to speak TLS.
fn with_scheme(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint.trim_end_matches('/'))
    }
}

/// `k1=v1,k2=v2` into gRPC metadata. Pairs without `=` or with an empty key
/// are skipped; keys are lowercased.
fn parse_metadata(raw: &str) -> Result<MetadataMap> {
    let mut metadata = MetadataMap::new();
    for (key, value) in raw.split(',').filter_map(|pair| pair.split_once('=')) {
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            continue;
        }
        let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
            .map_err(|e| anyhow!("invalid OTLP header name {key}: {e}"))?;
        let value: MetadataValue<Ascii> = value
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid OTLP header value for {key}: {e}"))?;
        metadata.insert(name, value);
    }
    Ok(metadata)
}

fn fmt_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    match format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Json => layer.json().flatten_event(true).boxed(),
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` directives win over `verbosity_level`, which defaults to `ERROR`.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or a subscriber is
/// already installed.
pub fn init(verbosity_level: Option<Level>, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.unwrap_or(Level::ERROR).into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?);

    let otel_layer = match OtlpSettings::from_env()? {
        Some(settings) => Some(tracing_opentelemetry::layer().with_tracer(settings.tracer()?)),
        None => None,
    };

    let subscriber = Registry::default()
        .with(fmt_layer(format))
        .with(otel_layer)
        .with(filter);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Flush pending spans. Does nothing when export was never enabled.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("flushing tracer provider");
        let _ = provider.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(endpoint: &str) -> OtlpSettings {
        OtlpSettings {
            endpoint: with_scheme(endpoint),
            metadata: MetadataMap::new(),
            instance_id: "test".to_string(),
        }
    }

    #[test]
    fn metadata_skips_malformed_pairs() -> Result<()> {
        assert!(parse_metadata("")?.is_empty());

        let metadata = parse_metadata("X-Api-Key = secret ,malformed, tenant=iskonnect,=orphan")?;
        assert_eq!(metadata.len(), 2);
        assert_eq!(
            metadata.get("x-api-key").and_then(|v| v.to_str().ok()),
            Some("secret")
        );
        assert_eq!(
            metadata.get("tenant").and_then(|v| v.to_str().ok()),
            Some("iskonnect")
        );
        Ok(())
    }

    #[test]
    fn metadata_keeps_padding_in_values() -> Result<()> {
        let metadata = parse_metadata("authorization=Basic dXNlcjpwYXNz==")?;
        assert_eq!(
            metadata.get("authorization").and_then(|v| v.to_str().ok()),
            Some("Basic dXNlcjpwYXNz==")
        );
        Ok(())
    }

    #[test]
    fn metadata_rejects_invalid_names() {
        assert!(parse_metadata("bad key=value").is_err());
    }

    #[test]
    fn endpoint_without_scheme_uses_tls() {
        assert_eq!(with_scheme("http://localhost:4317"), "http://localhost:4317");
        assert_eq!(
            with_scheme("collector.internal:4317/"),
            "https://collector.internal:4317"
        );

        assert_eq!(settings("http://localhost:4317").tls_domain(), None);
        assert_eq!(
            settings("collector.internal:4317").tls_domain(),
            Some("collector.internal")
        );
        assert_eq!(
            settings("https://otel.example.com/v1/traces").tls_domain(),
            Some("otel.example.com")
        );
    }

    #[test]
    fn settings_absent_without_endpoint() -> Result<()> {
        temp_env::with_var_unset("OTEL_EXPORTER_OTLP_ENDPOINT", || {
            assert!(OtlpSettings::from_env()?.is_none());
            Ok(())
        })
    }

    #[test]
    fn settings_read_headers_and_instance() -> Result<()> {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("otel.example.com:4317")),
                ("OTEL_EXPORTER_OTLP_HEADERS", Some("x-team=iskonnect")),
                ("OTEL_SERVICE_INSTANCE_ID", Some("api-1")),
            ],
            || {
                let settings = OtlpSettings::from_env()?.context("settings missing")?;
                assert_eq!(settings.endpoint, "https://otel.example.com:4317");
                assert_eq!(settings.instance_id, "api-1");
                assert_eq!(settings.metadata.len(), 1);
                Ok(())
            },
        )
    }

    #[test]
    fn shutdown_without_provider() {
        shutdown_tracer();
    }
}
