mod cli;
mod tensor_json;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{BackendKind, Cli, Command};
use liteport_core::{EngineConfig, InferenceEngine, TensorSpec};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).context("invalid --log filter")?)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run {
            model,
            input,
            backend,
            method,
            repeat,
            config,
            threads,
        } => {
            let mut config = load_config(config.as_deref())?;
            if threads.is_some() {
                config.num_threads = threads;
            }
            run(backend, config, model, &input, &method, repeat)
        }
        Command::Inspect {
            model,
            backend,
            check_methods,
        } => inspect(backend, &model, check_methods),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path).context("loading engine config"),
        None => Ok(EngineConfig::default()),
    }
}

fn build_engine(
    backend: BackendKind,
    config: EngineConfig,
    methods: Vec<String>,
) -> Result<InferenceEngine> {
    match backend {
        BackendKind::Ort => Ok(InferenceEngine::with_config(
            liteport_backend_ort::OrtBackend::new(),
            config,
        )),
        BackendKind::Bridge => bridge_engine(config, methods),
    }
}

#[cfg(feature = "native-bridge")]
fn bridge_engine(config: EngineConfig, methods: Vec<String>) -> Result<InferenceEngine> {
    let backend = liteport_backend_bridge::BridgeBackend::linked()?.with_methods(methods);
    Ok(InferenceEngine::with_config(backend, config))
}

#[cfg(not(feature = "native-bridge"))]
fn bridge_engine(_config: EngineConfig, _methods: Vec<String>) -> Result<InferenceEngine> {
    bail!("this binary was built without the native bridge (enable feature `native-bridge`)");
}

fn run(
    backend: BackendKind,
    config: EngineConfig,
    model_path: PathBuf,
    input: &Path,
    method: &str,
    repeat: usize,
) -> Result<()> {
    if repeat == 0 {
        bail!("--repeat must be at least 1");
    }

    let inputs = tensor_json::read_inputs(input)?;
    let engine = build_engine(backend, config, Vec::new())?;
    let model = engine
        .load_file(&model_path)
        .with_context(|| format!("loading {}", model_path.display()))?;

    let mut first = None;
    let mut total_us = 0u64;
    for iteration in 0..repeat {
        let t0 = Instant::now();
        let outputs = model
            .run_method(method, &inputs)
            .with_context(|| format!("running `{method}`"))?;
        let elapsed_us = t0.elapsed().as_micros() as u64;
        total_us += elapsed_us;
        tracing::info!(iteration, elapsed_us, "run finished");

        match &first {
            None => first = Some(outputs),
            Some(expected) if *expected != outputs => {
                tracing::warn!(iteration, "outputs differ from the first run");
            }
            Some(_) => {}
        }
    }
    model.release();

    if repeat > 1 {
        eprintln!(
            "{repeat} runs, mean {:.1} ms",
            total_us as f64 / repeat as f64 / 1000.0
        );
    }
    println!("{}", tensor_json::render_outputs(&first.unwrap_or_default())?);
    Ok(())
}

fn inspect(backend: BackendKind, model_path: &Path, check_methods: Vec<String>) -> Result<()> {
    let engine = build_engine(backend, EngineConfig::default(), check_methods)?;
    let model = engine
        .load_file(model_path)
        .with_context(|| format!("loading {}", model_path.display()))?;
    let spec = model.spec();

    println!("model:   {}", model_path.display());
    println!("runtime: {}", model.backend());
    println!("methods: {}", spec.methods.join(", "));
    for (label, tensors) in [("input", &spec.inputs), ("output", &spec.outputs)] {
        for t in tensors.iter() {
            println!("{label:<7}  {}", describe(t));
        }
    }
    if !engine.capabilities().introspects_signature {
        println!("(runtime does not report input/output signatures)");
    }
    Ok(())
}

fn describe(t: &TensorSpec) -> String {
    let dtype = t.dtype.map_or("?", |d| d.as_str());
    let dims: Vec<String> = t
        .dims
        .iter()
        .map(|d| d.map_or_else(|| "?".to_string(), |d| d.to_string()))
        .collect();
    format!("{} {dtype}[{}]", t.name.0, dims.join(", "))
}
