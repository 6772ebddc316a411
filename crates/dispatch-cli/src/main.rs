//! Demonstration binary embedding `dispatch_core`.
//!
//! Publishes a batch of tasks with a trivial handler, registers a pool of
//! claimers, runs them to exhaustion on real OS threads, and prints a
//! summary. This is a driver for exercising the library in a runnable
//! program, not a product surface in its own right.

mod cli;

use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use dispatch_core::{Claimer, Platform, PlatformConfig, Task, TaskResult};

use cli::Cli;

fn install_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn seed_tasks(platform: &Arc<Platform>, cli: &Cli) -> anyhow::Result<()> {
    for n in 0..cli.tasks {
        let task = Arc::new(Task::new(format!("demo-task-{n}")));
        task.set_category("demo");
        let priority = if cli.seed_priority_spread {
            (n * 100 / cli.tasks.max(1)) as i32
        } else {
            i32::from(dispatch_core::priority_levels::NORMAL)
        };
        task.set_priority(priority);
        task.set_handler(Box::new(move |task, input| {
            if task.is_cancel_requested() {
                return Err("cancelled before running".to_string());
            }
            Ok(TaskResult::ok(
                format!("processed {input}"),
                format!("task {n} output"),
            ))
        }));
        platform
            .publish(task)
            .context("publishing demo task")?;
    }
    Ok(())
}

fn run_claimer(platform: &Platform, claimer: &Arc<Claimer>) {
    loop {
        match platform.claim_matching(claimer) {
            Ok(task) => {
                let result = claimer.run(&task, "demo-input");
                if result.is_ok() {
                    tracing::info!(task = %task.id(), "task completed");
                } else {
                    tracing::warn!(task = %task.id(), "task failed");
                }
            }
            Err(_) => break,
        }
    }
}

fn main() -> anyhow::Result<()> {
    install_tracing();
    let cli = Cli::parse();

    let platform = Platform::new(PlatformConfig {
        max_queue_size: cli.max_queue_size,
    });
    seed_tasks(&platform, &cli)?;

    let claimers: Vec<Arc<Claimer>> = (0..cli.claimers)
        .map(|n| {
            let claimer = Claimer::new(format!("claimer-{n}"), format!("worker {n}"), 4);
            claimer.set_categories(["demo".to_string()]);
            platform.register_claimer(claimer.clone());
            claimer
        })
        .collect();

    thread::scope(|scope| {
        for claimer in &claimers {
            let platform = &platform;
            scope.spawn(move || run_claimer(platform, claimer));
        }
    });

    let stats = platform.get_statistics();
    println!("tasks published: {}", cli.tasks);
    println!("tasks remaining in registry: {}", stats.total_tasks);
    for (status, count) in &stats.by_status {
        println!("  {status}: {count}");
    }
    for claimer in &claimers {
        let claimer_stats = claimer.statistics();
        println!(
            "{}: completed={} abandoned={}",
            claimer.id(),
            claimer_stats.total_completed,
            claimer_stats.total_abandoned
        );
    }

    Ok(())
}
