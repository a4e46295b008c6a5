use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tempora::sink::LogSink;
use tempora::{Config, Engine, PlayerCommand, PlayerUpdate, Result, Sequence};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a short demo file: a program change and four notes
    WriteDemo { out: PathBuf },
    /// Print every event of a file
    Dump { file: PathBuf },
    /// Append a phrase after the last event and save as <name>_rewrited.mid
    Rewrite { file: PathBuf },
    /// Play a file through the transform pipeline
    Play {
        file: PathBuf,
        #[clap(long)]
        config: Option<PathBuf>,
        #[clap(long)]
        arpeggio: bool,
        #[clap(long)]
        skip_presets: bool,
        #[clap(long)]
        randomize_tempo: bool,
        /// Send to the MIDI output whose name contains this
        #[cfg(feature = "midir")]
        #[clap(long)]
        port: Option<String>,
    },
    /// Write the default configuration as RON
    Config { out: PathBuf },
    /// Forward a MIDI input through the pipeline until Enter is pressed
    #[cfg(feature = "midir")]
    Listen {
        #[clap(long)]
        port: Option<String>,
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

const TRACK1: usize = 1;
const CHANNEL0: u8 = 0;

/// D, E, G a quarter apart, then a silent note after a half note rest.
fn add_phrase(sequence: &mut Sequence, mut tick: u64) {
    let quarter = sequence.ticks_per_quarter() as u64;
    for key in [62, 64, 67] {
        sequence.add_note(TRACK1, tick, CHANNEL0, key, 50, quarter);
        tick += quarter;
    }
    tick += quarter;
    sequence.add_note(TRACK1, tick, CHANNEL0, 80, 0, quarter);
}

fn write_demo(out: &Path) -> Result<()> {
    let mut sequence = Sequence::new(500)?;
    sequence.add_patch_change(TRACK1, 0, CHANNEL0, 10);
    add_phrase(&mut sequence, 500);
    sequence.finalize();
    sequence.log_events();
    sequence.write_file(out)?;
    info!(path = %out.display(), "demo written");
    Ok(())
}

fn rewrite(file: &Path) -> Result<()> {
    let mut sequence = Sequence::load_file(file)?;
    sequence.finalize();
    sequence.log_events();

    let last = sequence.last_event().map(|e| e.tick).unwrap_or(0);
    info!(tick = last, "last event");
    let start = last + sequence.ticks_per_quarter() as u64;
    add_phrase(&mut sequence, start);
    sequence.finalize();
    sequence.log_events();

    let stem = file.file_stem().unwrap_or_default().to_string_lossy();
    let out = file.with_file_name(format!("{stem}_rewrited.mid"));
    sequence.write_file(&out)?;
    info!(path = %out.display(), "rewritten");
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}

fn wait_until_idle(engine: &Engine) {
    let scheduler = engine.scheduler();
    while scheduler.stats().pending > 0 {
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn play(file: &Path, config: Config, engine: Engine) -> Result<()> {
    let sequence = Sequence::load_file(file)?;
    info!(
        path = %file.display(),
        duration_ms = sequence.duration_ms() as u64,
        settings = ?config.transform,
        "playing"
    );
    let player = engine.spawn_player(sequence)?;
    player.send(PlayerCommand::Play);
    for update in player.update_rx.iter() {
        info!(?update, tick = player.current_tick(), "player");
        if matches!(update, PlayerUpdate::Finished { .. }) {
            break;
        }
    }
    // Arpeggio tails and note releases may still be queued.
    wait_until_idle(&engine);
    player.join();
    wait_until_idle(&engine);
    engine.shutdown();
    Ok(())
}

#[cfg(feature = "midir")]
fn listen(port: Option<&str>, config: Config) -> Result<()> {
    use tempora::input::MidirInput;
    use tempora::sink::MidirSink;

    let engine = match MidirSink::connect(None) {
        Ok(out) => Engine::new(out, &config)?,
        Err(e) => {
            info!("{e}, logging events instead");
            Engine::new(LogSink, &config)?
        }
    };
    info!(ports = ?MidirInput::port_names()?, "MIDI inputs");
    let (thread, mut monitor) = engine.spawn_input(MidirInput::connect(port)?)?;

    let (quit_tx, quit_rx) = crossbeam::channel::bounded::<()>(1);
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = quit_tx.send(());
    });
    info!("listening, press Enter to quit");
    while quit_rx.recv_timeout(Duration::from_millis(10)).is_err() {
        for event in monitor.drain() {
            info!("{event}");
        }
    }
    thread.stop();
    engine.shutdown();
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::WriteDemo { out } => write_demo(&out),
        Command::Dump { file } => {
            let mut sequence = Sequence::load_file(&file)?;
            sequence.finalize();
            sequence.log_events();
            Ok(())
        }
        Command::Rewrite { file } => rewrite(&file),
        Command::Play {
            file,
            config,
            arpeggio,
            skip_presets,
            randomize_tempo,
            #[cfg(feature = "midir")]
            port,
        } => {
            let mut config = load_config(config.as_deref())?;
            config.transform.arpeggio.enabled |= arpeggio;
            config.transform.skip_preset_changes |= skip_presets;
            config.transform.randomize_tempo |= randomize_tempo;

            #[cfg(feature = "midir")]
            let engine = match port {
                Some(port) => Engine::new(tempora::sink::MidirSink::connect(Some(&port))?, &config)?,
                None => Engine::new(LogSink, &config)?,
            };
            #[cfg(not(feature = "midir"))]
            let engine = Engine::new(LogSink, &config)?;
            play(&file, config, engine)
        }
        Command::Config { out } => {
            Config::default().save(&out)?;
            info!(path = %out.display(), "default config written");
            Ok(())
        }
        #[cfg(feature = "midir")]
        Command::Listen { port, config } => listen(port.as_deref(), load_config(config.as_deref())?),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
