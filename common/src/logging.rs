use tracing_subscriber::EnvFilter;

pub fn filter_directive(level: &str) -> EnvFilter {
    let filter = format!("convos_sync={level},convos_common={level}");
    EnvFilter::builder().parse_lossy(filter)
}
