use anyhow::{Context, bail};
use biolock::capture::SimulatedCamera;
use biolock::config::{Config, RfidInput, app_name, app_version};
use biolock::control;
use biolock::credentials::{CredentialStore, JsonCredentialStore};
use biolock::feedback::{Buzzer, Cue, FeedbackSink, LogFeedback};
use biolock::lock::{OutputPin, SysfsPin};
use biolock::pipeline::{NoFaceRecognizer, RejectAllLiveness};
use biolock::rfid::{parse_trigger_key, spawn_keyboard_wedge, spawn_stdin_reader};
use biolock::{AccessController, Backends};
use clap::{Arg, ArgAction, ArgMatches, Command};
use interprocess::local_socket::traits::Stream;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::{panic, process};
use tokio::sync::mpsc;

fn cli() -> Command {
    Command::new(app_name())
        .version(app_version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file.")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .default_value("biolock.json"),
        )
        .subcommand(
            Command::new("run")
                .about("Run the access controller for one lock.")
                .arg(
                    Arg::new("simulate")
                        .short('s')
                        .long("simulate")
                        .help("Do not touch GPIO: lock and buzzer are only logged.")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("rfid-input")
                        .long("rfid-input")
                        .value_name("SOURCE")
                        .help("Where the RFID reader writes card ids.")
                        .value_parser(["stdin", "keyboard", "disabled"]),
                ),
        )
        .subcommand(
            Command::new("ctl")
                .about("Send a command to the running controller.")
                .arg(
                    Arg::new("command")
                        .help("trigger | status | lock | unlock [seconds] | reload | scan <card>")
                        .required(true)
                        .num_args(1..),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<Config> {
    let path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("biolock.json"));

    if !path.exists() {
        warn!("{} not found, running with defaults", path.display());
        return Ok(Config::default());
    }
    Config::load(&path).with_context(|| format!("loading {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = cli().get_matches();
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("ctl", sub)) => {
            let words: Vec<&str> = sub
                .get_many::<String>("command")
                .map(|w| w.map(String::as_str).collect())
                .unwrap_or_default();
            let reply = control::send(&config.lock_id, &words.join(" "))
                .with_context(|| format!("no controller running for lock {:?}", config.lock_id))?;
            println!("{}", reply);
            Ok(())
        }
        Some(("run", sub)) => run(config, sub),
        _ => bail!("unknown subcommand"),
    }
}

fn run(mut config: Config, matches: &ArgMatches) -> anyhow::Result<()> {
    let simulate = matches.get_flag("simulate");
    if let Some(input) = matches.get_one::<String>("rfid-input") {
        config.rfid.input = match input.as_str() {
            "keyboard" => RfidInput::Keyboard,
            "disabled" => RfidInput::Disabled,
            _ => RfidInput::Stdin,
        };
    }

    // one process per lock
    let name = control::socket_name(&config.lock_id)?;
    if interprocess::local_socket::Stream::connect(name).is_ok() {
        bail!("a controller for lock {:?} is already running", config.lock_id);
    }

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    runtime.block_on(serve(config, simulate))
}

fn output_pin(pin: Option<u32>, simulate: bool) -> anyhow::Result<Option<Box<dyn OutputPin>>> {
    match pin {
        Some(pin) if !simulate => {
            let pin = SysfsPin::open(pin).with_context(|| format!("opening GPIO {}", pin))?;
            Ok(Some(Box::new(pin)))
        }
        _ => Ok(None),
    }
}

async fn serve(config: Config, simulate: bool) -> anyhow::Result<()> {
    let credentials: Arc<dyn CredentialStore> = Arc::new(
        JsonCredentialStore::open(
            &config.credentials.persons_file,
            &config.credentials.cards_file,
        )
        .context("loading credentials")?,
    );

    let feedback: Arc<dyn FeedbackSink> = match output_pin(config.feedback.buzzer_pin, simulate)? {
        Some(pin) => Arc::new(Buzzer::new(pin)?),
        None => Arc::new(LogFeedback),
    };

    let camera = &config.camera;
    let backends = Backends {
        camera: Box::new(SimulatedCamera::new(
            camera.device_index,
            camera.width,
            camera.height,
        )),
        recognizer: Arc::new(NoFaceRecognizer),
        liveness: Arc::new(RejectAllLiveness),
        credentials,
        lock_pin: output_pin(config.lock.gpio_pin, simulate)?,
        feedback: feedback.clone(),
    };

    let rfid = config.rfid.clone();
    let trigger_key = config.trigger.keyboard_key.clone();
    let controller = AccessController::new(config, backends).context("starting controller")?;
    let cancel = controller.cancel_token();

    // leave the door locked whatever happens to the process
    let on_panic = controller.clone();
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        on_panic.force_lock();
        process::exit(105);
    }));

    let on_signal = controller.clone();
    ctrlc::set_handler(move || {
        on_signal.shutdown();
        process::exit(130);
    })
    .context("setting Ctrl-C handler")?;

    let (scan_tx, scan_rx) = mpsc::channel(rfid.queue_capacity);
    match rfid.input {
        RfidInput::Stdin => spawn_stdin_reader(scan_tx)?,
        RfidInput::Keyboard => {
            let key = trigger_key.as_deref().and_then(|name| {
                let key = parse_trigger_key(name);
                if key.is_none() {
                    warn!("Unknown trigger key {:?}, keyboard trigger disabled", name);
                }
                key
            });
            let (trigger_tx, mut trigger_rx) = mpsc::channel(4);
            spawn_keyboard_wedge(scan_tx, key.map(|_| trigger_tx), key)?;

            let buttons = controller.clone();
            tokio::spawn(async move {
                while trigger_rx.recv().await.is_some() {
                    buttons.trigger();
                }
            });
        }
        RfidInput::Disabled => info!("RFID input disabled"),
    }
    if rfid.input != RfidInput::Disabled {
        tokio::spawn(controller.arbiter().run(scan_rx, cancel.clone()));
    }

    feedback.cue(Cue::Startup);
    info!("{} {} ready for lock {:?}", app_name(), app_version(), controller.lock_id());

    let result = control::serve(controller.clone(), cancel.clone())
        .await
        .context("control socket");
    controller.shutdown();
    result
}
