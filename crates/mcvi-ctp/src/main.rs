use anyhow::Context;
use clap::Parser;
use mcvi_core::{
    evaluation_with_greedy_tree_policy, evaluation_with_simulation_fsc, Belief, McviPlanner,
    PlanConfig, PomdpSim,
};
use mcvi_ctp::Ctp;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mcvi-ctp")]
#[command(about = "Plan a Canadian Traveller policy with Monte-Carlo value iteration")]
struct Cli {
    /// RNG seed for belief sampling, planning and evaluation.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Particles sampled into the initial belief.
    #[arg(long, default_value_t = 1000)]
    particles: usize,

    /// Planner iteration cap.
    #[arg(long, default_value_t = 30)]
    iterations: usize,

    /// Convergence threshold on the root bound gap.
    #[arg(long, default_value_t = 0.1)]
    epsilon: f64,

    /// Wall-clock budget in milliseconds; the current controller is
    /// returned when it runs out.
    #[arg(long)]
    time_limit_ms: Option<u64>,

    /// Descent / rollout horizon.
    #[arg(long, default_value_t = 30)]
    sim_depth: usize,

    /// States sampled per action expansion.
    #[arg(long, default_value_t = 100)]
    belief_samples: usize,

    /// Write the resulting controller as Graphviz dot.
    #[arg(long)]
    controller_out: Option<PathBuf>,

    /// Write the road graph as Graphviz dot.
    #[arg(long)]
    graph_out: Option<PathBuf>,

    /// Evaluation rollouts.
    #[arg(long, default_value_t = 1000)]
    eval_sims: usize,

    /// Steps per evaluation rollout.
    #[arg(long, default_value_t = 60)]
    eval_steps: usize,

    /// Per-iteration planner telemetry.
    #[arg(long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let pomdp = Ctp::demo_graph();
    if let Some(path) = &cli.graph_out {
        let mut out = BufWriter::new(File::create(path).context("creating graph file")?);
        pomdp.visualise(&mut out).context("writing road graph")?;
    }

    let mut rng = SmallRng::seed_from_u64(cli.seed);
    let belief = Belief::from_states((0..cli.particles).map(|_| pomdp.sample_start_state(&mut rng)));
    tracing::info!(
        particles = cli.particles,
        states = belief.len(),
        actions = pomdp.num_actions(),
        observations = pomdp.num_observations(),
        "sampled initial belief"
    );

    let config = PlanConfig {
        max_iter: cli.iterations,
        converge_thresh: cli.epsilon,
        max_computation_ms: cli.time_limit_ms,
        max_sim_depth: cli.sim_depth,
        max_belief_samples: cli.belief_samples,
        ..PlanConfig::default()
    };
    let mut planner = McviPlanner::new(
        &pomdp,
        belief,
        config,
        SmallRng::seed_from_u64(cli.seed.wrapping_add(1)),
    );
    let stats = planner.plan().context("planning failed")?;
    println!(
        "planned {} iterations in {:.2?}: bounds [{:.4}, {:.4}], {} controller nodes{}",
        stats.iterations,
        stats.elapsed,
        stats.root_lower,
        stats.root_upper,
        stats.fsc_nodes,
        if stats.converged { ", converged" } else { "" },
    );

    if let Some(path) = &cli.controller_out {
        let mut out = BufWriter::new(File::create(path).context("creating controller file")?);
        planner
            .fsc()
            .write_graphviz(&mut out, &pomdp.action_names(), &[])
            .context("writing controller")?;
    }

    let mut eval_rng = SmallRng::seed_from_u64(cli.seed.wrapping_add(2));
    let fsc_stats = evaluation_with_simulation_fsc(
        planner.fsc(),
        &pomdp,
        cli.eval_steps,
        cli.eval_sims,
        &mut eval_rng,
    );
    println!("controller rollouts: {fsc_stats}");

    if let Some(root) = planner.root() {
        let tree_stats = evaluation_with_greedy_tree_policy(
            planner.tree(),
            root,
            &pomdp,
            cli.eval_steps,
            cli.eval_sims,
            &mut eval_rng,
        );
        println!("greedy tree rollouts: {tree_stats}");
    }

    Ok(())
}
