use std::{thread, time::Duration};

use metrics::{counter, gauge, histogram};
use metrics_exporter_graphite::GraphiteBuilder;

fn main() {
    tracing_subscriber::fmt::init();

    GraphiteBuilder::default()
        .with_remote_address("net.tcp://localhost:2003")
        .expect("failed to parse remote address")
        .with_flush_interval(Duration::from_secs(10))
        .add_global_tag("app", "demo")
        .add_global_tag("env", "dev")
        .with_default_context("worker")
        .install()
        .expect("failed to install Graphite recorder");

    counter!("idle_metric").increment(1);
    gauge!("testing").set(42.0);

    let server_loops = counter!("tcp_server_loops", "system" => "foo");
    let server_loops_delta_secs = histogram!("tcp_server_loop_delta_secs", "system" => "foo");

    // Loop over and over, pretending to do some work.
    loop {
        server_loops.increment(1);
        server_loops_delta_secs.record(rand::random_range(0.0..1.0));

        let gauge = gauge!("lucky_iterations");
        if rand::random_bool(0.75) {
            gauge.increment(1.0);
        } else {
            gauge.decrement(1.0);
        }

        thread::sleep(Duration::from_millis(10));
    }
}
