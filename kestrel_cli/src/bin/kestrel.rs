//! A small server-side JavaScript runtime.

use kestrel_core::cli::CliOptions;
use kestrel_core::js::{JsRuntime, JsRuntimeOptions};
use kestrel_core::log;

use clap::Parser;
use tracing::debug;

fn main() {
  log::init();
  let options = CliOptions::parse();
  debug!("cli options: {options:?}");

  if options.version {
    println!("{}", kestrel::version_line());
    return;
  }

  let Some(script) = options.script.clone() else {
    eprintln!("Usage: kestrel <script> [arguments...]");
    std::process::exit(1);
  };

  let runtime_options = JsRuntimeOptions {
    exec_path: CliOptions::exec_path(),
    script: Some(script.clone()),
    args: options.args.clone(),
    reload: options.reload,
    v8_flags: options.v8_flags.clone(),
  };

  let mut runtime = match JsRuntime::new(runtime_options) {
    Ok(runtime) => runtime,
    Err(e) => {
      eprintln!("Failed to start runtime: {e}");
      std::process::exit(1);
    }
  };

  match runtime.execute_module(&script, None) {
    Ok(_) => runtime.run_event_loop(),
    Err(e) => {
      eprintln!("{e}");
      std::process::exit(1);
    }
  }
}
