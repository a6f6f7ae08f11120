//! Terminal player for compiled skein stories.
//!
//! Usage: `skein story.json [--restore SAVE] [--save SAVE]`

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;

use skein_vm::Story;

#[derive(Parser, Debug)]
#[command(name = "skein")]
#[command(about = "Play a compiled story in the terminal")]
struct Args {
    /// Path to the compiled story document
    story: PathBuf,

    /// Restore a saved state before playing
    #[arg(long = "restore")]
    restore: Option<PathBuf>,

    /// Write the final state to this file on exit
    #[arg(long = "save")]
    save: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let text = fs::read_to_string(&args.story)
        .with_context(|| format!("reading {}", args.story.display()))?;
    let mut story = Story::new(&text).context("loading story")?;

    if let Some(path) = &args.restore {
        let saved =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        story.load(&saved).context("restoring saved state")?;
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        while story.can_continue() {
            print!("{}", story.continue_story()?);
        }
        for warning in &story.state().warnings {
            warn!("{warning}");
        }

        let choices = story.current_choices();
        if choices.is_empty() {
            break;
        }
        for (i, choice) in choices.iter().enumerate() {
            println!("{}: {}", i + 1, choice.text);
        }

        let index = loop {
            print!("?> ");
            io::stdout().flush()?;
            let Some(line) = lines.next() else {
                // Input closed mid-choice; stop playing.
                return finish(&args, &story);
            };
            let line = line?;
            match line.trim().parse::<usize>() {
                Ok(n) if n >= 1 && n <= choices.len() => break n - 1,
                _ => println!("enter a number between 1 and {}", choices.len()),
            }
        };
        story.choose_choice(index)?;
    }

    finish(&args, &story)
}

fn finish(args: &Args, story: &Story) -> Result<()> {
    if let Some(path) = &args.save {
        let state = story.save().context("serializing state")?;
        fs::write(path, state).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}
