#[macro_use]
extern crate serde_derive;

use std::fs;
use std::io::{self, Write};

use docopt::Docopt;

use lockstep::log::{self as trace, ConsoleLogger, FileLogger};
use lockstep::{millis_to_dur, simulate, EngineConfig, Error, Script};

const USAGE: &str = "
Lockstep.

Usage:
  lockstep [options] <script>
  lockstep (-h | --help)
  lockstep --version

Options:
  -h --help          Show this screen.
  --version          Show version.
  --config=FILE      Engine configuration as JSON.
  --midi=FILE        Take the tempo map and ppq from a standard MIDI file.
  --duration=MS      Length of the simulated run in milliseconds [default: 10000].
  --trace=FILE       Also write the trace to FILE as lines of JSON.
  --echo             Also print the trace to stdout as it is replayed.
  --pretty           Pretty print the result.
";

#[derive(Debug, Deserialize)]
struct Args {
    arg_script: String,
    flag_config: Option<String>,
    flag_midi: Option<String>,
    flag_duration: f64,
    flag_trace: Option<String>,
    flag_echo: bool,
    flag_pretty: bool,
    flag_version: bool,
}

fn run_app(args: &Args) -> Result<String, Error> {
    let mut config = match args.flag_config {
        Some(ref path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let mut script = Script::load(&args.arg_script)?;
    if let Some(ref path) = args.flag_midi {
        let bytes = fs::read(path)?;
        config.ppq = script.use_midi_tempo(&bytes)?;
    }

    let duration = millis_to_dur(args.flag_duration.max(0.0));
    let sim = simulate(&config, &script, duration)?;
    if let Some(ref path) = args.flag_trace {
        trace::replay(&FileLogger::new(path), &sim.trace)?;
    }
    if args.flag_echo {
        trace::replay(&ConsoleLogger::new(), &sim.trace)?;
    }
    let out = if args.flag_pretty {
        serde_json::to_string_pretty(&sim)?
    } else {
        serde_json::to_string(&sim)?
    };
    Ok(out)
}

fn main() {
    env_logger::init();

    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());
    if args.flag_version {
        println!("v{}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let code = match run_app(&args) {
        Ok(out) => {
            println!("{}", out);
            0
        }
        Err(err) => {
            let _ = writeln!(io::stderr(), "Error: {}", err);
            1
        }
    };

    std::process::exit(code);
}
