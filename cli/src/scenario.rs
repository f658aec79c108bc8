//! Scripted guard sessions.
//!
//! A scenario is a TOML file listing router transitions and auth-source
//! notifications in order. Each step is fed to a [`NavigationGuard`] wired
//! to the loaded configuration, and everything the guard does is reported
//! as an [`Output`] record.
//!
//! ```toml
//! start = "/"
//!
//! [[steps]]
//! action = "navigate"
//! to = "/dashboard"
//!
//! [[steps]]
//! action = "session"
//! user = "ada"
//! ```

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use gatekeep_config::GatekeepConfig;
use gatekeep_core::{
    GuardOptions, HistoryNavigator, NavigationGuard, Navigator, Resumption, SessionStore,
    SessionTransition, StaticRouteTable, UserModelSync,
};
use gatekeep_types::{Decision, RoutePath};

fn default_start() -> RoutePath {
    RoutePath::new("/").expect("root path is non-empty")
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Location the navigator starts at.
    #[serde(default = "default_start")]
    pub start: RoutePath,
    /// When present, a user model follows the session and is rebuilt after
    /// every session step.
    pub model: Option<ModelSettings>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelSettings {
    /// Simulated latency of the model lookup.
    #[serde(default)]
    pub delay_ms: u64,
    /// Users that get the `admin` role.
    #[serde(default)]
    pub admins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Router attempts a transition. `from` defaults to the current location.
    Navigate {
        to: RoutePath,
        from: Option<RoutePath>,
    },
    /// Auth source reports a user, or a sign-out when `user` is absent.
    Session { user: Option<String> },
    Resume,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid scenario {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Output {
    Deferred {
        step: usize,
        to: RoutePath,
        from: RoutePath,
    },
    Decision {
        step: usize,
        to: RoutePath,
        outcome: Decision,
    },
    Redirect {
        step: usize,
        to: RoutePath,
    },
    Session {
        step: usize,
        transition: &'static str,
        user: Option<String>,
    },
    Resumed {
        step: usize,
        outcome: &'static str,
    },
    Model {
        step: usize,
        role: Option<String>,
        error: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub role: String,
}

fn transition_name(transition: SessionTransition) -> &'static str {
    match transition {
        SessionTransition::FirstCheck => "first_check",
        SessionTransition::SignedIn => "signed_in",
        SessionTransition::SignedOut => "signed_out",
        SessionTransition::Refreshed => "refreshed",
    }
}

fn resumption_name(resumption: Option<&Resumption>) -> &'static str {
    match resumption {
        None => "noop",
        Some(Resumption::Replayed { .. }) => "replayed",
        Some(Resumption::Redirected(_)) => "redirected",
        Some(Resumption::Stranded) => "stranded",
    }
}

fn model_sync(
    session: SessionStore<String>,
    config: &GatekeepConfig,
    settings: ModelSettings,
) -> UserModelSync<String, Account> {
    let admins = Rc::new(settings.admins);
    let delay = Duration::from_millis(settings.delay_ms);
    UserModelSync::from_config(session, &config.guard).with_builder(move |user: Rc<String>| {
        let admins = Rc::clone(&admins);
        async move {
            tokio::time::sleep(delay).await;
            let role = if admins.iter().any(|admin| admin == user.as_str()) {
                "admin"
            } else {
                "member"
            };
            Ok::<_, anyhow::Error>(Some(Account {
                role: role.to_string(),
            }))
        }
    })
}

type DecisionLog = Rc<RefCell<Vec<(RoutePath, Decision)>>>;

/// Report settled decisions and redirects for `step`, committing each one to
/// the navigator the way a router would.
fn flush<E>(
    step: usize,
    decisions: &DecisionLog,
    guard: &mut NavigationGuard<String, HistoryNavigator>,
    emit: &mut E,
) -> Result<()>
where
    E: FnMut(&Output) -> Result<()>,
{
    let settled = std::mem::take(&mut *decisions.borrow_mut());
    for (to, outcome) in settled {
        let landed = outcome.redirect_target().unwrap_or(&to).clone();
        guard.navigator_mut().commit(landed);
        emit(&Output::Decision { step, to, outcome })?;
    }
    for to in guard.navigator_mut().take_redirects() {
        emit(&Output::Redirect { step, to })?;
    }
    Ok(())
}

/// Play `scenario` against a fresh guard. Steps are numbered from 1.
pub async fn run<E>(config: &GatekeepConfig, scenario: Scenario, mut emit: E) -> Result<()>
where
    E: FnMut(&Output) -> Result<()>,
{
    let session = SessionStore::<String>::new();
    let mut guard = NavigationGuard::install(
        GuardOptions::from_config(&config.guard),
        StaticRouteTable::from_entries(&config.routes),
        session.clone(),
        HistoryNavigator::new(scenario.start.clone()),
    );
    let sync = scenario
        .model
        .map(|settings| model_sync(session.clone(), config, settings));
    let decisions: DecisionLog = Rc::new(RefCell::new(Vec::new()));

    for (index, step) in scenario.steps.into_iter().enumerate() {
        let step_no = index + 1;
        tracing::debug!(step = step_no, ?step, "running step");
        match step {
            Step::Navigate { to, from } => {
                let from = from.unwrap_or_else(|| guard.navigator().current_path());
                let sink = Rc::clone(&decisions);
                let target = to.clone();
                let decided = guard.guard_transition(to.clone(), from.clone(), move |decision| {
                    sink.borrow_mut().push((target, decision));
                });
                if decided.is_none() {
                    emit(&Output::Deferred {
                        step: step_no,
                        to,
                        from,
                    })?;
                }
            }
            Step::Session { user } => {
                let transition = guard.on_session_change(user.clone()).await?;
                emit(&Output::Session {
                    step: step_no,
                    transition: transition_name(transition),
                    user,
                })?;
                let refreshed = match &sync {
                    Some(sync) => sync.sync_pending().await,
                    None => None,
                };
                if let Some(result) = refreshed {
                    let record = match result {
                        Ok(profile) => Output::Model {
                            step: step_no,
                            role: profile.model.map(|account| account.role.clone()),
                            error: None,
                        },
                        Err(err) => Output::Model {
                            step: step_no,
                            role: None,
                            error: Some(err.to_string()),
                        },
                    };
                    emit(&record)?;
                }
            }
            Step::Resume => {
                let resumption = guard.resume_deferred().await?;
                emit(&Output::Resumed {
                    step: step_no,
                    outcome: resumption_name(resumption.as_ref()),
                })?;
            }
        }
        flush(step_no, &decisions, &mut guard, &mut emit)?;
    }
    Ok(())
}
