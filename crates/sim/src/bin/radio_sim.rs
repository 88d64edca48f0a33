//! runs every preset side by side and prints a report per preset

use anyhow::Result;
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use wsn_sim::{scenarios, SimulationPresets};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    println!("{}", "Duty-cycled WSN Simulation".bright_blue().bold());
    println!("{}", "==========================".bright_blue());
    println!();

    let bars = MultiProgress::new();
    let style = ProgressStyle::with_template("{prefix:>14} [{bar:40.cyan/blue}] {pos:>4}/{len}s {msg}")?
        .progress_chars("=> ");

    let mut handles = Vec::new();
    for (name, config) in SimulationPresets::all() {
        let bar = bars.add(ProgressBar::new(config.duration.as_secs()));
        bar.set_style(style.clone());
        bar.set_prefix(name);
        handles.push((
            name,
            tokio::task::spawn_blocking(move || {
                let report = scenarios::run_with_progress(config, |now| bar.set_position(now.as_secs()));
                bar.finish_with_message("done");
                report
            }),
        ));
    }

    let mut failures = 0;
    for (name, handle) in handles {
        println!("{}", format!("\n>>> {}", name).bright_green().bold());
        match handle.await? {
            Ok(report) => {
                let ratio = format!("{:.1}%", report.delivery_ratio * 100.0);
                let ratio = if report.delivery_ratio >= 0.9 {
                    ratio.bright_green()
                } else if report.delivery_ratio >= 0.5 {
                    ratio.bright_yellow()
                } else {
                    ratio.bright_red()
                };
                println!("Delivery ratio: {}", ratio);
                print!("{}", report);
            }
            Err(e) => {
                failures += 1;
                println!("{} {:#}", "Simulation aborted:".bright_red().bold(), e);
            }
        }
        println!("{}", "-".repeat(50));
    }

    if failures == 0 {
        println!("\n{}", "All simulations complete!".bright_green().bold());
    } else {
        println!("\n{}", format!("{} simulation(s) aborted", failures).bright_red().bold());
    }
    Ok(())
}
