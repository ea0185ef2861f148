//! Shardroute replica selection load simulator.
//!
//! Routes a stream of simulated read requests against one shard layout and
//! reports how the chosen copies spread over the nodes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{self, LevelFilter};
use rand::Rng;
use statistical::{mean, standard_deviation};
use tokio::runtime::Builder;
use tokio::sync::watch;
use tokio::task::JoinSet;

use shardroute::{
    logger_init, pf_error, pf_info, pf_warn, set_log_identity, DiscoveryNodes,
    NodeUsageCounters, Preference, ResponseCollector, RouteContext,
    ShardRouteError, ShardRouter,
};

mod layout;

use crate::layout::Layout;

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to the shard layout TOML file.
    #[arg(short, long)]
    layout: PathBuf,

    /// Number of simulated requests.
    #[arg(short, long, default_value_t = 10000)]
    requests: usize,

    /// Routing preference of every request; empty means none.
    #[arg(short, long, default_value_t = String::from(""))]
    preference: String,

    /// Statistics collector configuration TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    config: String,

    /// Disable adaptive replica selection for requests without preference.
    #[arg(long, default_value_t = false)]
    no_adaptive: bool,

    /// Maximum number of requests in flight.
    #[arg(long, default_value_t = 64)]
    inflight: usize,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(preference)` on success
    /// or `Err(ShardRouteError)` on any error.
    fn sanitize(&self) -> Result<Option<Preference>, ShardRouteError> {
        if self.requests == 0 {
            Err(ShardRouteError::msg(format!(
                "invalid number of requests {}",
                self.requests
            )))
        } else if self.inflight == 0 {
            Err(ShardRouteError::msg(format!(
                "invalid inflight limit {}",
                self.inflight
            )))
        } else if self.threads < 2 {
            Err(ShardRouteError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else if self.preference.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.preference.parse()?))
        }
    }

    /// Collector config string with '+' turned into newlines.
    fn collector_config(&self) -> Option<String> {
        if self.config.is_empty() {
            None
        } else {
            Some(self.config.replace('+', "\n"))
        }
    }

    /// Router config string.
    fn router_config(&self) -> Option<&'static str> {
        if self.no_adaptive {
            Some("adaptive_selection = false")
        } else {
            None
        }
    }
}

/// State shared by all simulated requests.
struct Simulation {
    layout: Layout,
    router: ShardRouter,
    collector: ResponseCollector,
    nodes: DiscoveryNodes,
    preference: Option<Preference>,
}

impl Simulation {
    /// Routes one request, takes the first copy, and feeds a synthetic
    /// response of its node back to the collector. Returns the node served.
    fn serve_one(&self) -> Result<Option<String>, ShardRouteError> {
        let usage = NodeUsageCounters::new();
        let ctx = RouteContext::default()
            .with_resolver(&self.nodes)
            .with_stats(&self.collector, &usage);
        let mut iter = self.router.route(self.preference.as_ref(), &ctx)?;

        let node = match iter.next().as_ref().and_then(|c| c.current_node())
        {
            Some(node) => node.to_string(),
            None => return Ok(None),
        };
        if let Some(spec) = self.layout.node(&node) {
            let mut rng = rand::thread_rng();
            let (queue_size, response_time, service_time) =
                spec.observation(rng.gen_range(0.8..1.2), rng.gen_range(0..=2));
            self.collector
                .observe(&node, queue_size, response_time, service_time);
        }
        Ok(Some(node))
    }
}

/// Prints per-node hit counts and their spread.
fn print_summary(hits: &BTreeMap<String, u64>, served: usize, missed: usize) {
    println!("{:>12} {:>10} {:>8}", "node", "hits", "share");
    for (node, count) in hits {
        println!(
            "{:>12} {:>10} {:>7.2}%",
            node,
            count,
            *count as f64 * 100.0 / served.max(1) as f64
        );
    }
    let counts: Vec<f64> = hits.values().map(|&c| c as f64).collect();
    if counts.len() > 1 {
        println!(
            "served {}  missed {}  mean {:.2}  stdev {:.2}",
            served,
            missed,
            mean(&counts),
            standard_deviation(&counts, None)
        );
    } else {
        println!("served {}  missed {}", served, missed);
    }
}

/// Actual main function of the simulator.
fn sim_main() -> Result<(), ShardRouteError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    let preference = args.sanitize()?;

    // set up the simulated shard
    let layout = Layout::load(&args.layout)?;
    set_log_identity(match layout.local_node {
        Some(ref node) => format!("sim@{}", node),
        None => "sim".into(),
    });
    let router = ShardRouter::new_with_config(
        layout.routing_table()?,
        args.router_config(),
    )?;
    let collector_config = args.collector_config();
    let collector =
        ResponseCollector::new_with_config(collector_config.as_deref())?;
    layout.seed_collector(&collector);
    let nodes = layout.discovery_nodes();
    pf_info!("simulating {} requests on {}", args.requests, router.table());

    let sim = Arc::new(Simulation {
        layout,
        router,
        collector,
        nodes,
        preference,
    });

    // set up termination signals handler
    let (tx_term, rx_term) = watch::channel(false);
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pf_error!("error sending to term channel: {}", e);
        }
    })?;

    let log_level = log::max_level();
    let (hits, served, missed) = {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-sim")
            .build()?;

        let (requests, inflight) = (args.requests, args.inflight);
        runtime.block_on(async move {
            let mut hits: BTreeMap<String, u64> = BTreeMap::new();
            let (mut served, mut missed) = (0usize, 0usize);
            let mut tally = |res: Result<Option<String>, ShardRouteError>| {
                match res {
                    Ok(Some(node)) => {
                        *hits.entry(node).or_default() += 1;
                        served += 1;
                    }
                    Ok(None) => missed += 1,
                    Err(e) => {
                        pf_warn!("request failed: {}", e);
                        missed += 1;
                    }
                }
            };

            let mut tasks = JoinSet::new();
            for _ in 0..requests {
                if *rx_term.borrow() {
                    pf_warn!("terminated early");
                    break;
                }
                while tasks.len() >= inflight {
                    if let Some(res) = tasks.join_next().await {
                        tally(res.map_err(ShardRouteError::msg)?);
                    }
                }
                let sim = sim.clone();
                tasks.spawn(async move { sim.serve_one() });
            }
            while let Some(res) = tasks.join_next().await {
                tally(res.map_err(ShardRouteError::msg)?);
            }
            drop(tally);

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<_, ShardRouteError>((hits, served, missed))
        })?
    }; // drop the runtime here

    log::set_max_level(log_level);
    print_summary(&hits, served, missed);
    Ok(())
}

/// Main function of the simulator.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = sim_main() {
        pf_error!("sim_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
