use std::thread;
use std::time::Duration;

use lightmetric::{Opts, Summary};
use lightmetric_exporter::{ExporterBuilder, ExporterStatus};
use rand::Rng;

fn main() {
    tracing_subscriber::fmt::init();

    let exporter = ExporterBuilder::new()
        .with_address("127.0.0.1", 9000)
        .expect("invalid listen address")
        .install()
        .expect("failed to install exporter");

    if let Some(ExporterStatus::Failed(reason)) = exporter.status() {
        panic!("failed to start exporter: {reason}");
    }

    let loops = exporter
        .counter_with_labels("server_loops", &["system"], "Iterations of the server loop so far.")
        .expect("failed to register counter");
    let lucky = exporter
        .gauge("lucky_iterations", "Lucky iterations minus unlucky ones.")
        .expect("failed to register gauge");
    let payloads = exporter
        .histogram("payload_bytes", "Sizes of handled payloads.")
        .expect("failed to register histogram");

    // Summaries with quantiles are built directly and registered into the exporter's registry.
    let delta = Summary::builder(Opts::new("server_loop_delta_seconds", "Time between loops."))
        .quantile(0.5, 0.05)
        .and_then(|b| b.quantile(0.99, 0.001))
        .and_then(|b| b.build())
        .expect("invalid summary")
        .register(exporter.registry())
        .expect("failed to register summary");

    let mut rng = rand::rng();
    loop {
        let timer = delta.start_timer().expect("summary has no labels");

        loops.labels(&["foo"]).expect("one label value").inc();
        payloads.observe(rng.random_range(0.0..2_000.0)).expect("histogram has no labels");

        if rng.random_bool(0.75) {
            lucky.inc().expect("gauge has no labels");
        } else {
            lucky.dec().expect("gauge has no labels");
        }

        thread::sleep(Duration::from_millis(750));
        timer.observe_duration();
    }
}
