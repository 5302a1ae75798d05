//! fpolicy CLI - offline harness for the Feature-Policy override engine
//!
//! Usage:
//!   fpolicy parse "geolocation 'self'; usb *"
//!   fpolicy rewrite -H "Feature-Policy: usb *" --deny usb
//!   fpolicy navigate --from https://a.test/ --to https://b.test/ --deny usb

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use fpolicy::rewriter::MAIN_FRAME_ID;
use fpolicy::{
    AllowList, Background, BackgroundConfig, DirectiveSet, FeatureEvaluation, FeatureName,
    HeadersReceivedDetails, HttpHeader, InspectorError, NavigationAction, NavigationReconciler,
    PageInspector, PageReloader, Panel, PanelConfig, PolicyRecord, PolicyStore, TabId,
    header::is_feature_policy_header,
};

/// Parse and rewrite Feature-Policy headers the way the extension does
#[derive(Parser, Debug)]
#[command(name = "fpolicy")]
#[command(about = "Inspect and override Feature-Policy headers offline")]
struct Cli {
    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse header values, later values winning, and print the directive set
    Parse {
        /// Feature-Policy header values, in response order
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Run a response through the background header hook
    Rewrite {
        /// Response header as "Name: value"; repeatable
        #[arg(short = 'H', long = "header", value_parser = parse_header_arg)]
        headers: Vec<HttpHeader>,

        /// Force a feature on; repeatable
        #[arg(long = "allow", value_name = "FEATURE")]
        allow: Vec<String>,

        /// Force a feature off; repeatable
        #[arg(long = "deny", value_name = "FEATURE")]
        deny: Vec<String>,

        /// Frame the response belongs to
        #[arg(long, default_value_t = MAIN_FRAME_ID)]
        frame_id: i64,

        /// Do not open a panel session for the tab
        #[arg(long)]
        no_session: bool,

        /// Page URL the panel reports
        #[arg(long, default_value = "https://example.test/")]
        url: String,
    },
    /// Show what a navigation does to the overrides
    Navigate {
        /// URL the panel opened on
        #[arg(long)]
        from: String,

        /// URL the page navigated to
        #[arg(long)]
        to: String,

        /// Force a feature on; repeatable
        #[arg(long = "allow", value_name = "FEATURE")]
        allow: Vec<String>,

        /// Force a feature off; repeatable
        #[arg(long = "deny", value_name = "FEATURE")]
        deny: Vec<String>,

        /// Keep overrides when the URL changes
        #[arg(long)]
        persist_across_reload: bool,
    },
}

/// Features forced on and off from the command line.
#[derive(Debug, Default)]
struct OverrideArgs {
    allow: Vec<String>,
    deny: Vec<String>,
}

impl OverrideArgs {
    fn features(&self) -> impl Iterator<Item = FeatureName> + '_ {
        self.allow
            .iter()
            .chain(&self.deny)
            .map(|feature| FeatureName::from(feature.as_str()))
    }

    fn settings(&self) -> impl Iterator<Item = (&str, bool)> + '_ {
        let allow = self.allow.iter().map(|f| (f.as_str(), true));
        let deny = self.deny.iter().map(|f| (f.as_str(), false));
        allow.chain(deny)
    }
}

/// Parse a `-H "Name: value"` argument.
fn parse_header_arg(arg: &str) -> Result<HttpHeader, String> {
    let (name, value) = arg
        .split_once(':')
        .ok_or_else(|| format!("expected \"Name: value\", got {arg:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {arg:?}"));
    }
    Ok(HttpHeader::new(name, value.trim()))
}

/// Inspector answering from the response's own Feature-Policy headers.
#[derive(Debug)]
struct HeaderInspector {
    supported: Vec<FeatureName>,
    declared: DirectiveSet,
}

impl HeaderInspector {
    fn new(headers: &[HttpHeader], extra: impl IntoIterator<Item = FeatureName>) -> Self {
        let mut declared = DirectiveSet::new();
        for header in headers.iter().filter(|h| is_feature_policy_header(&h.name)) {
            declared.extend_from_header(&header.value);
        }
        let mut supported: Vec<FeatureName> =
            declared.iter().map(|(feature, _)| feature.clone()).collect();
        supported.extend(extra);
        supported.sort();
        supported.dedup();
        Self {
            supported,
            declared,
        }
    }
}

#[async_trait]
impl PageInspector for HeaderInspector {
    async fn list_supported_features(&self) -> Result<Vec<FeatureName>, InspectorError> {
        Ok(self.supported.clone())
    }

    async fn evaluate_policy(
        &self,
        features: &[FeatureName],
    ) -> Result<BTreeMap<FeatureName, FeatureEvaluation>, InspectorError> {
        Ok(features
            .iter()
            .map(|feature| {
                let allow_list = self
                    .declared
                    .get(feature.as_str())
                    .cloned()
                    .unwrap_or_else(|| AllowList::parse("'self'"));
                let evaluation = FeatureEvaluation {
                    allowed: allow_list.allows_any(),
                    allow_list,
                };
                (feature.clone(), evaluation)
            })
            .collect())
    }
}

#[derive(Debug)]
struct LogReloader;

impl PageReloader for LogReloader {
    fn reload(&self) {
        tracing::debug!("page reload requested");
    }
}

fn print_directives(directives: &DirectiveSet, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(directives)?);
    } else {
        for (feature, allow_list) in directives {
            println!("{feature}\t{allow_list}");
        }
    }
    Ok(())
}

fn print_headers(headers: &[HttpHeader], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(headers)?);
    } else {
        for header in headers {
            println!("{}: {}", header.name, header.value);
        }
    }
    Ok(())
}

fn parse(values: &[String], json: bool) -> anyhow::Result<()> {
    let mut directives = DirectiveSet::new();
    for value in values {
        directives.extend_from_header(value);
    }
    print_directives(&directives, json)
}

async fn rewrite(
    headers: Vec<HttpHeader>,
    overrides: &OverrideArgs,
    frame_id: i64,
    no_session: bool,
    url: &str,
    json: bool,
) -> anyhow::Result<()> {
    let tab_id = TabId::new(1);
    let (handle, _task) = Background::new().spawn(&BackgroundConfig::default());

    let panel = if no_session {
        None
    } else {
        let inspector = HeaderInspector::new(&headers, overrides.features());
        let mut panel = Panel::new(
            tab_id,
            handle.connect(),
            Arc::new(inspector),
            Arc::new(LogReloader),
            &PanelConfig::default(),
        );
        panel.start(url).await;
        for (feature, allowed) in overrides.settings() {
            panel.set_override(feature, allowed).await;
            if let Some(error) = panel.error() {
                bail!("cannot override {feature}: {error}");
            }
        }
        Some(panel)
    };

    let details = HeadersReceivedDetails {
        tab_id,
        frame_id,
        response_headers: headers.clone(),
    };
    let rewritten = handle
        .headers_received(details)
        .await
        .context("background process stopped")?;

    if let Some(panel) = panel {
        panel.close();
    }

    match rewritten {
        Some(response) => print_headers(&response.response_headers, json),
        None => {
            tracing::info!(frame_id, "headers passed through unchanged");
            print_headers(&headers, json)
        }
    }
}

fn navigate(
    from: &str,
    to: &str,
    overrides: &OverrideArgs,
    persist_across_reload: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut store = PolicyStore::new();
    store.set_supported_features(overrides.features());
    for (feature, allowed) in overrides.settings() {
        store.set_override(feature, allowed)?;
    }

    let mut navigation = NavigationReconciler::new(persist_across_reload);
    navigation.start(from);
    let action = navigation.on_navigated(to, &mut store);
    let kept: Vec<&PolicyRecord> = store.overrides().values().collect();

    if json {
        let report = serde_json::json!({
            "action": match action {
                NavigationAction::Reload => "reload",
                NavigationAction::Refetch => "refetch",
            },
            "overrides": kept,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{action:?}");
        for record in kept {
            println!("{}\t{}", record.feature, record.allow_list);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Parse { values } => parse(&values, cli.json),
        Command::Rewrite {
            headers,
            allow,
            deny,
            frame_id,
            no_session,
            url,
        } => {
            let overrides = OverrideArgs { allow, deny };
            rewrite(headers, &overrides, frame_id, no_session, &url, cli.json).await
        }
        Command::Navigate {
            from,
            to,
            allow,
            deny,
            persist_across_reload,
        } => {
            let overrides = OverrideArgs { allow, deny };
            navigate(&from, &to, &overrides, persist_across_reload, cli.json)
        }
    }
}
