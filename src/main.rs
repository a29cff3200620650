use bluconsole_assist::client::{BluClient, BluCredentials};
use bluconsole_assist::config::Config;
use bluconsole_assist::provider::CompletionClient;
use bluconsole_assist::services::workbook::{SheetAnalysis, SheetSummary};
use bluconsole_assist::services::{answer, context, exposure, snapshot, workbook};
use bluconsole_assist::store::{ContextStore, MemoryStore};
use bluconsole_assist::utils::format_utc;
use chrono::Utc;
use log::{error, info, warn};
use std::path::{Path, PathBuf};

/// Default abuse cutoff when `--cutoff` is not given. 5 C suits chilled
/// produce; frozen goods want their own value.
const DEFAULT_CUTOFF_C: f64 = 5.0;

#[derive(Debug, Default)]
struct CliArgs {
    env_file: Option<PathBuf>,
    workbook: Option<PathBuf>,
    prompt: Option<String>,
    cutoff_c: Option<f64>,
}

fn parse_args() -> Result<CliArgs, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut cli = CliArgs::default();
    while let Some(os) = args.next() {
        let arg = os.into_string().map_err(|_| "argument contains invalid UTF-8".to_string())?;
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) => (f.to_string(), Some(v.to_string())),
            None => (arg, None),
        };
        match flag.as_str() {
            "--env-file" => {
                if cli.env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                cli.env_file = Some(PathBuf::from(flag_value(&flag, inline, &mut args)?));
            }
            "--workbook" => {
                if cli.workbook.is_some() {
                    return Err("`--workbook` provided more than once".to_string());
                }
                cli.workbook = Some(PathBuf::from(flag_value(&flag, inline, &mut args)?));
            }
            "--prompt" => {
                if cli.prompt.is_some() {
                    return Err("`--prompt` provided more than once".to_string());
                }
                cli.prompt = Some(flag_value(&flag, inline, &mut args)?);
            }
            "--cutoff" => {
                if cli.cutoff_c.is_some() {
                    return Err("`--cutoff` provided more than once".to_string());
                }
                let raw = flag_value(&flag, inline, &mut args)?;
                let parsed = raw
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| format!("`--cutoff` must be a number, got {}", raw))?;
                cli.cutoff_c = Some(parsed);
            }
            "--" => break,
            other => return Err(format!("unrecognised argument: {}", other)),
        }
    }
    Ok(cli)
}

fn flag_value(
    flag: &str,
    inline: Option<String>,
    args: &mut std::env::ArgsOs,
) -> Result<String, String> {
    match inline {
        Some(v) if !v.is_empty() => Ok(v),
        Some(_) => Err(format!("`{}` requires a value", flag)),
        None => match args.next() {
            Some(os) => {
                os.into_string().map_err(|_| "argument contains invalid UTF-8".to_string())
            }
            None => Err(format!("`{}` requires a value", flag)),
        },
    }
}

fn configure_env(cli: &CliArgs) -> Result<Option<PathBuf>, String> {
    if let Some(path) = &cli.env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(path)?;
        return Ok(Some(path.clone()));
    }
    let default_path = Path::new(".env");
    if default_path.is_file() {
        load_env_file(default_path)?;
        return Ok(Some(default_path.to_path_buf()));
    }
    Ok(None)
}

fn load_env_file(path: &Path) -> Result<(), String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;

    for (index, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let assignment = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);
        let Some((key, value)) = assignment.split_once('=') else {
            return Err(format!("{}:{}: missing '=' in assignment", path.display(), index + 1));
        };
        let key = key.trim();
        if key.is_empty() || key.chars().any(|c| c.is_whitespace()) {
            return Err(format!("{}:{}: invalid variable name", path.display(), index + 1));
        }
        // Values already present in the process environment win.
        if std::env::var_os(key).is_none() {
            // No other threads exist this early, so mutating the environment is fine.
            unsafe {
                std::env::set_var(key, unquote(value.trim()));
            }
        }
    }
    Ok(())
}

fn unquote(raw: &str) -> &str {
    if raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\'')))
    {
        &raw[1..raw.len() - 1]
    } else {
        raw
    }
}

fn run(cli: &CliArgs) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (console={}, provider_key={}, model={})",
        cfg.blu_base_url,
        if cfg.openai_api_key.is_some() { "set" } else { "unset" },
        cfg.openai_model
    );

    // 2) Sign in to the console
    let client = BluClient::new(&cfg.blu_base_url);
    let creds = BluCredentials {
        username: cfg.blu_username.clone(),
        password: cfg.blu_password.clone(),
    };
    client.login(&creds).map_err(|e| format!("console login failed: {}", e))?;
    info!("Authenticated to BluConsole");

    // 3) Account status snapshot
    let snap = snapshot::collect(&client, &creds, Utc::now())?;
    println!("{}", snap.render());

    // 4) Workbook report
    let mut attachment: Option<SheetSummary> = None;
    if let Some(path) = &cli.workbook {
        let bytes = std::fs::read(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        let analysis =
            workbook::analyze(&bytes).map_err(|e| format!("workbook analysis failed: {}", e))?;
        report_workbook(&analysis, cli.cutoff_c.unwrap_or(DEFAULT_CUTOFF_C));
        attachment = Some(analysis.summary);
    }

    // 5) Answer one prompt with full context
    if let Some(prompt) = &cli.prompt {
        answer_prompt(&cfg, &client, &creds, prompt, attachment)?;
    }

    Ok(())
}

fn report_workbook(analysis: &SheetAnalysis, cutoff_c: f64) {
    let summary = &analysis.summary;
    println!();
    println!("Workbook: {} data rows. Columns: {}.", summary.row_count, summary.column_list());
    println!("Time range: readings {}.", summary.range_sentence());
    println!("Temperature: {}, {}.", summary.stats_sentence(), summary.endpoints_sentence());

    let exposure = exposure::compute(&analysis.series, cutoff_c);
    println!(
        "Exposure above {:.1} C: {:.2} of {:.2} monitored hour(s) ({:.1}%), \
         {} excursion(s), longest {:.2} h.",
        cutoff_c,
        exposure.hours_above,
        exposure.total_hours,
        exposure.pct_above,
        exposure.excursions,
        exposure.longest_streak_hours
    );

    let shelf = exposure::shelf_life(&exposure);
    println!(
        "Shelf life: {:.2} day(s) estimated ({:.1}% of baseline, {:.1}% reduction), \
         {:.1}% risk of loss.",
        shelf.estimated_days, shelf.remaining_pct, shelf.reduction_pct, shelf.risk_of_loss_pct
    );

    let means = exposure::hourly_means(&analysis.series);
    if !means.is_empty() {
        println!("Hourly means:");
        for (at, mean) in means {
            println!("  {}  {:.2} C", format_utc(at), mean);
        }
    }
}

fn answer_prompt(
    cfg: &Config,
    client: &BluClient,
    creds: &BluCredentials,
    prompt: &str,
    attachment: Option<SheetSummary>,
) -> Result<(), String> {
    let Some(api_key) = &cfg.openai_api_key else {
        warn!("OPENAI_API_KEY not set; skipping the prompt");
        return Ok(());
    };

    let owner = cfg.blu_username.as_str();
    let mut store = MemoryStore::new();
    if let Some(summary) = attachment {
        store.set_attachment(owner, summary);
    }

    let blob = context::build(client, &store, Some(creds), owner, prompt, Utc::now());
    let provider = CompletionClient::new(&cfg.openai_base_url, api_key, &cfg.openai_model);
    let summary = store.latest_attachment(owner);
    let reply = answer::respond(&provider, blob, prompt, owner, summary.as_ref())
        .map_err(|e| format!("assistant call failed: {}", e))?;

    println!();
    println!("{}", reply);
    Ok(())
}

fn main() {
    let cli = match parse_args() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };
    let loaded_env = match configure_env(&cli) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter).format_timestamp_secs().init();

    if let Some(path) = loaded_env.as_ref() {
        info!("Environment loaded from .env file: {}", path.display());
    }

    info!(
        "bluconsole-assist {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(&cli) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
