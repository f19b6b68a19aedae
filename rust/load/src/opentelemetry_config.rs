use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing_bunyan_formatter::BunyanFormattingLayer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

/// Install the global subscriber: bunyan JSON on stdout, plus OTLP traces and metrics when an
/// endpoint is configured.
pub(crate) fn init_otel_tracing(service_name: &str, otel_endpoint: Option<&str>) {
    let exporter_layer = otel_endpoint.map(|otel_endpoint| {
        tracing::info!(
            "Registering otlp exporter for {} at endpoint {}",
            service_name,
            otel_endpoint
        );
        let resource = opentelemetry_sdk::Resource::new(vec![opentelemetry::KeyValue::new(
            "service.name",
            service_name.to_string(),
        )]);

        // Prepare tracer.
        let tracing_span_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(otel_endpoint)
            .build()
            .expect("could not build span exporter for tracing");
        let trace_config =
            opentelemetry_sdk::trace::Config::default().with_resource(resource.clone());
        let tracer_provider = opentelemetry_sdk::trace::TracerProvider::builder()
            .with_batch_exporter(tracing_span_exporter, opentelemetry_sdk::runtime::Tokio)
            .with_config(trace_config)
            .build();
        let tracer = tracer_provider.tracer(service_name.to_string());

        // Prepare meter.  Check tallies and latencies are exported from here.
        let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(
                std::env::var("OTEL_EXPORTER_OTLP_METRICS_ENDPOINT")
                    .unwrap_or(otel_endpoint.to_string()),
            )
            .build()
            .expect("could not build metric exporter");
        let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(
            metric_exporter,
            opentelemetry_sdk::runtime::Tokio,
        )
        .build();
        let meter_provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(resource)
            .build();
        global::set_meter_provider(meter_provider);

        tracing_opentelemetry::OpenTelemetryLayer::new(tracer)
            .with_filter(tracing_subscriber::filter::LevelFilter::INFO)
    });
    // Per-iteration failures are logged at debug; keep stdout at INFO.
    let stdout_layer = BunyanFormattingLayer::new(service_name.to_string(), std::io::stdout)
        .with_filter(tracing_subscriber::filter::LevelFilter::INFO);
    // Everything from this crate, errors only from libraries, unless RUST_LOG says otherwise.
    let global_layer = EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or("error,tsdb_load=trace".to_string()),
    );

    let subscriber = tracing_subscriber::registry()
        .with(global_layer)
        .with(stdout_layer)
        .with(exporter_layer);
    global::set_text_map_propagator(TraceContextPropagator::new());
    tracing::subscriber::set_global_default(subscriber)
        .expect("Set global default subscriber failed");

    // Add panics to tracing
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let payload = panic_info.payload();

        #[allow(clippy::manual_map)]
        let payload = if let Some(s) = payload.downcast_ref::<&str>() {
            Some(&**s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Some(s.as_str())
        } else {
            None
        };

        tracing::error!(
            panic.payload = payload,
            panic.location = panic_info.location().map(|l| l.to_string()),
            panic.backtrace = tracing::field::display(std::backtrace::Backtrace::capture()),
            "A panic occurred"
        );

        prev_hook(panic_info);
    }));
}
