// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::time::Duration;

use async_trait::async_trait;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use tokio::runtime;
use tokio::sync::mpsc;

use kraken::channel::{Channel, ChannelHandler, Client, Frame, NoopHandler, Shutdown, ShutdownTrigger};
use kraken::config::{Config, CONFIG_ENV, DEFAULT_CONFIG_FILE};
use kraken::procs::{self, ProcessIdent, Supervisor, Wrapper};
use kraken::{Error, ErrorKind};

const CONFIG: &str = "config";
const FORCE: &str = "force";
const HOST: &str = "host";
const PORT: &str = "port";
const TEXT: &str = "text";

const CREATE: &str = "create";
const DESTROY: &str = "destroy";
const EXISTS: &str = "exists";
const START: &str = "start";
const STOP: &str = "stop";
const SEND: &str = "send";
const WRAP: &str = "wrap";

/// How long `send` waits for the server's greeting
const GREETING_TIMEOUT: Duration = Duration::from_secs(5);

trait SetupClapApp {
    fn setup_clap_app(self) -> Self;
    fn server_opts(self) -> Self;
}

impl SetupClapApp for Command {
    fn setup_clap_app(self) -> Self {
        self.version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
    }

    fn server_opts(self) -> Self {
        self.arg(
            Arg::new(HOST)
                .long(HOST)
                .value_name("HOST")
                .help("control channel host, defaults to server.host from the configuration"),
        )
        .arg(
            Arg::new(PORT)
                .long(PORT)
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("control channel port, defaults to server.port from the configuration"),
        )
    }
}

fn alias_arg() -> Arg {
    Arg::new(procs::ALIAS)
        .long(procs::ALIAS)
        .value_name("ALIAS")
        .required(true)
        .help("name the process is registered under")
}

fn force_arg(help: &'static str) -> Arg {
    Arg::new(FORCE).long(FORCE).action(ArgAction::SetTrue).help(help)
}

fn create_sub_command() -> Command {
    let arg = |name: &'static str| Arg::new(name).long(name).required(true);

    Command::new(CREATE)
        .alias("CREATE")
        .about("launch a process under an alias and print its pid, 0 if it never registered")
        .arg(alias_arg())
        .arg(arg(procs::PROJECT))
        .arg(arg(procs::COMPONENT))
        .arg(arg(procs::PROCESS))
        .arg(force_arg("replace a running process with the same alias"))
}

fn destroy_sub_command() -> Command {
    Command::new(DESTROY)
        .alias("DESTROY")
        .about("terminate the process registered under an alias")
        .arg(alias_arg())
        .arg(force_arg("kill instead of asking the process to stop"))
}

fn exists_sub_command() -> Command {
    Command::new(EXISTS)
        .alias("EXISTS")
        .about("print whether a live process is registered under an alias")
        .arg(alias_arg())
}

fn start_sub_command() -> Command {
    Command::new(START)
        .alias("START")
        .about("run the control channel server until a client asks it to exit")
}

fn stop_sub_command() -> Command {
    Command::new(STOP)
        .alias("STOP")
        .about("ask a running control channel server to exit")
}

fn send_sub_command() -> Command {
    Command::new(SEND)
        .alias("SEND")
        .about("send a text message to the control channel server and print its greeting")
        .arg(
            Arg::new(TEXT)
                .long(TEXT)
                .value_name("TEXT")
                .required(true),
        )
}

fn wrap_sub_command() -> Command {
    let arg = |name: &'static str| Arg::new(name).required(true);

    Command::new(WRAP)
        .about("run the configured worker and keep it registered (started by create)")
        .hide(true)
        .arg(arg(procs::ALIAS))
        .arg(arg(procs::PROJECT))
        .arg(arg(procs::COMPONENT))
        .arg(arg(procs::PROCESS))
}

fn app() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .setup_clap_app()
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new(CONFIG)
                .long(CONFIG)
                .value_name("FILE")
                .env(CONFIG_ENV)
                .default_value(DEFAULT_CONFIG_FILE)
                .global(true)
                .help("JSON configuration file"),
        )
        .subcommand(create_sub_command().setup_clap_app())
        .subcommand(destroy_sub_command().setup_clap_app())
        .subcommand(exists_sub_command().setup_clap_app())
        .subcommand(start_sub_command().setup_clap_app().server_opts())
        .subcommand(stop_sub_command().setup_clap_app().server_opts())
        .subcommand(send_sub_command().setup_clap_app().server_opts())
        .subcommand(wrap_sub_command().setup_clap_app())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = app().get_matches();

    let runtime = match runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => exit(Err(Error::from(e))),
    };

    // exit with the runtime still alive, a blocking stdin read must not hold up the wrapper
    exit(runtime.block_on(run(&args)))
}

fn exit(result: Result<i32, Error>) -> ! {
    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(code = e.code(), "{}", e);
            std::process::exit(e.code())
        }
    }
}

async fn run(args: &ArgMatches) -> Result<i32, Error> {
    match args.subcommand() {
        Some((CREATE, args)) => create(args).await,
        Some((DESTROY, args)) => destroy(args).await,
        Some((EXISTS, args)) => exists(args).await,
        Some((START, args)) => start(args).await,
        Some((STOP, args)) => stop(args).await,
        Some((SEND, args)) => send(args).await,
        Some((WRAP, args)) => wrap(args).await,
        Some((other, _)) => Err(Error::from(format!("unexpected command: {}", other))),
        None => Err(Error::from("command required")),
    }
}

fn value<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str, Error> {
    args.get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| Error::from(format!("--{} is required", name)))
}

fn load_config(args: &ArgMatches) -> Result<Config, Error> {
    Config::load(value(args, CONFIG)?)
}

/// Host and port from the command line, falling back to the configuration
fn server_addr(args: &ArgMatches) -> Result<(String, u16), Error> {
    let host = args.get_one::<String>(HOST).cloned();
    let port = args.get_one::<u16>(PORT).copied();

    match (host, port) {
        (Some(host), Some(port)) => Ok((host, port)),
        (host, port) => {
            let server = load_config(args)?.server;
            Ok((host.unwrap_or(server.host), port.unwrap_or(server.port)))
        }
    }
}

async fn create(args: &ArgMatches) -> Result<i32, Error> {
    let supervisor = Supervisor::from_config(&load_config(args)?)?;
    let ident = ProcessIdent::new(
        value(args, procs::ALIAS)?,
        value(args, procs::PROJECT)?,
        value(args, procs::COMPONENT)?,
        value(args, procs::PROCESS)?,
    );

    let pid = supervisor.create_process(&ident, args.get_flag(FORCE)).await?;
    println!("{}", pid);

    Ok(0)
}

async fn destroy(args: &ArgMatches) -> Result<i32, Error> {
    let supervisor = Supervisor::from_config(&load_config(args)?)?;
    supervisor
        .destroy_process(value(args, procs::ALIAS)?, args.get_flag(FORCE))
        .await?;

    Ok(0)
}

async fn exists(args: &ArgMatches) -> Result<i32, Error> {
    let supervisor = Supervisor::from_config(&load_config(args)?)?;
    println!("{}", supervisor.exists_process(value(args, procs::ALIAS)?).await?);

    Ok(0)
}

async fn wrap(args: &ArgMatches) -> Result<i32, Error> {
    let wrapper = Wrapper::from_config(&load_config(args)?)?;
    let ident = ProcessIdent::new(
        value(args, procs::ALIAS)?,
        value(args, procs::PROJECT)?,
        value(args, procs::COMPONENT)?,
        value(args, procs::PROCESS)?,
    );

    wrapper.run(&ident).await
}

/// Logs traffic and stops the server when a client sends the exit command
struct ServerHandler {
    trigger: ShutdownTrigger,
}

#[async_trait]
impl ChannelHandler for ServerHandler {
    async fn on_client_start(&self, client: &Client) {
        tracing::info!(peer = %client.peer(), "client connected");
    }

    async fn on_client_stop(&self, client: &Client) {
        tracing::info!(peer = %client.peer(), "client disconnected");
    }

    async fn on_message(&self, client: &Client, frame: Frame) {
        tracing::info!(peer = %client.peer(), %frame, "received");

        if frame.is_exit() {
            self.trigger.request().await;
        }
    }
}

async fn start(args: &ArgMatches) -> Result<i32, Error> {
    let (host, port) = server_addr(args)?;

    let shutdown = Shutdown::new();
    let handler = ServerHandler {
        trigger: shutdown.trigger(),
    };
    let channel = Channel::with_shutdown(handler, shutdown);
    channel.listen(&host, port).await?;

    tokio::select! {
        stopped = channel.wait_for_shutdown() => stopped?,
        interrupted = tokio::signal::ctrl_c() => {
            interrupted?;
            tracing::info!("interrupted");
            channel.close().await?;
        }
    }

    Ok(0)
}

async fn stop(args: &ArgMatches) -> Result<i32, Error> {
    let (host, port) = server_addr(args)?;

    let channel = Channel::new(NoopHandler);
    let client = channel.connect(&host, port).await?;
    channel.write_message(&client, &Frame::exit()).await?;
    channel.close().await?;

    Ok(0)
}

/// Forwards everything the server sends
struct Replies(mpsc::UnboundedSender<Frame>);

#[async_trait]
impl ChannelHandler for Replies {
    async fn on_message(&self, _client: &Client, frame: Frame) {
        self.0.send(frame).ok();
    }
}

async fn send(args: &ArgMatches) -> Result<i32, Error> {
    let (host, port) = server_addr(args)?;
    let text = value(args, TEXT)?;

    let (replies, mut received) = mpsc::unbounded_channel();
    let channel = Channel::new(Replies(replies));
    let client = channel.connect(&host, port).await?;
    channel.write_message(&client, &Frame::text(text)).await?;

    let greeting = tokio::time::timeout(GREETING_TIMEOUT, received.recv())
        .await
        .ok()
        .flatten()
        .ok_or_else(|| ErrorKind::ReadClosed(format!("no greeting from {}:{}", host, port)))?;
    println!("{}", greeting.get_text().unwrap_or_default());

    channel.close().await?;
    Ok(0)
}
