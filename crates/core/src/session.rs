//! Interactive session controller
//!
//! The session is a plain state value. [`Session::update`] consumes one
//! [`Event`] and returns the next state together with at most one
//! [`Command`] for the caller to run asynchronously. Completion of that work
//! comes back as another event. Nothing in here performs I/O.
//!
//! Screens: the container list, a transient loading screen with a busy
//! indicator, and the environment editor of one container. Keystrokes that
//! arrive while loading are dropped.

use crate::directory::replace_id;
use crate::docker::{short_id, ContainerSummary};
use crate::env::{validate_name, EnvVar, EnvironmentAssertion};
use crate::errors::RuntimeError;
use crate::mutation::MutationResult;
use tracing::debug;

/// Frames of the busy indicator
pub const BUSY_FRAMES: [&str; 4] = ["|", "/", "-", "\\"];

/// Input keys the session understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Down,
    Enter,
    Tab,
    Esc,
    Backspace,
    Char(char),
    /// Ctrl+C
    Interrupt,
}

/// Inputs of the state machine
#[derive(Debug)]
pub enum Event {
    KeyPress(Key),
    ContainersLoaded(Vec<ContainerSummary>),
    SnapshotLoaded {
        container_id: String,
        environment: Vec<EnvVar>,
    },
    MutationCompleted {
        container_id: String,
        result: MutationResult,
    },
    TickElapsed,
    RuntimeError(RuntimeError),
}

/// Work the caller runs on the session's behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    LoadContainers,
    LoadEnvironment {
        container_id: String,
    },
    ApplyMutation {
        container_id: String,
        assertion: EnvironmentAssertion,
    },
    /// Abandon the running mutation if it has not stopped the container yet
    CancelMutation,
    Quit,
}

/// Inline input on the environment screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// New value for an existing variable
    EditValue { name: String, input: String },
    /// Name of a variable to add
    NewName { input: String },
    /// Value of a variable to add
    NewValue { name: String, input: String },
}

impl Prompt {
    pub fn label(&self) -> String {
        match self {
            Self::EditValue { name, .. } | Self::NewValue { name, .. } => {
                format!("{} =", name)
            }
            Self::NewName { .. } => "New variable name:".to_string(),
        }
    }

    pub fn input(&self) -> &str {
        match self {
            Self::EditValue { input, .. }
            | Self::NewName { input }
            | Self::NewValue { input, .. } => input,
        }
    }

    fn input_mut(&mut self) -> &mut String {
        match self {
            Self::EditValue { input, .. }
            | Self::NewName { input }
            | Self::NewValue { input, .. } => input,
        }
    }
}

/// Environment editor of one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentView {
    pub container_id: String,
    pub container_name: String,
    pub rows: Vec<EnvVar>,
    pub selected: usize,
    pub prompt: Option<Prompt>,
}

/// What a loading screen waits for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pending {
    Containers,
    Snapshot { container_id: String },
    Mutation { view: EnvironmentView, variable: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Containers,
    Loading(Pending),
    Environment(EnvironmentView),
}

/// Interactive session state
#[derive(Debug, Clone)]
pub struct Session {
    containers: Vec<ContainerSummary>,
    selected: usize,
    screen: Screen,
    error: Option<String>,
    notice: Option<String>,
    busy_frame: usize,
    quit_requested: bool,
}

impl Session {
    /// Start on the container list
    pub fn new(containers: Vec<ContainerSummary>) -> Self {
        Self {
            containers,
            selected: 0,
            screen: Screen::Containers,
            error: None,
            notice: None,
            busy_frame: 0,
            quit_requested: false,
        }
    }

    pub fn containers(&self) -> &[ContainerSummary] {
        &self.containers
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    /// Last error, shown until the next confirmed action
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.screen, Screen::Loading(_))
    }

    /// Current frame of the busy indicator
    pub fn busy_indicator(&self) -> &'static str {
        BUSY_FRAMES[self.busy_frame % BUSY_FRAMES.len()]
    }

    /// The environment being edited, also while a mutation of it is running
    pub fn environment(&self) -> Option<&EnvironmentView> {
        match &self.screen {
            Screen::Environment(view) => Some(view),
            Screen::Loading(Pending::Mutation { view, .. }) => Some(view),
            _ => None,
        }
    }

    /// Advance the state machine by one event
    pub fn update(mut self, event: Event) -> (Self, Option<Command>) {
        let command = match event {
            Event::KeyPress(key) => self.on_key(key),
            Event::ContainersLoaded(rows) => self.on_containers_loaded(rows),
            Event::SnapshotLoaded {
                container_id,
                environment,
            } => self.on_snapshot(container_id, environment),
            Event::MutationCompleted {
                container_id,
                result,
            } => self.on_mutation(container_id, result),
            Event::TickElapsed => {
                if self.is_loading() {
                    self.busy_frame = self.busy_frame.wrapping_add(1);
                }
                None
            }
            Event::RuntimeError(err) => self.on_runtime_error(err),
        };
        (self, command)
    }

    fn on_key(&mut self, key: Key) -> Option<Command> {
        if key == Key::Interrupt {
            // A recreate past Stop runs to completion before the process exits
            if let Screen::Loading(Pending::Mutation { .. }) = self.screen {
                self.quit_requested = true;
                self.notice = Some("Exiting once the running update completes".to_string());
                return Some(Command::CancelMutation);
            }
            return Some(Command::Quit);
        }

        match std::mem::replace(&mut self.screen, Screen::Containers) {
            Screen::Containers => self.on_containers_key(key),
            Screen::Loading(pending) => {
                debug!("Dropping key {:?} while loading", key);
                self.screen = Screen::Loading(pending);
                None
            }
            Screen::Environment(view) => self.on_environment_key(view, key),
        }
    }

    fn on_containers_key(&mut self, key: Key) -> Option<Command> {
        match key {
            Key::Up | Key::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
                None
            }
            Key::Down | Key::Char('j') => {
                if self.selected + 1 < self.containers.len() {
                    self.selected += 1;
                }
                None
            }
            Key::Enter | Key::Tab => {
                let container_id = self.containers.get(self.selected)?.id.clone();
                self.error = None;
                self.notice = None;
                self.screen = Screen::Loading(Pending::Snapshot {
                    container_id: container_id.clone(),
                });
                Some(Command::LoadEnvironment { container_id })
            }
            Key::Char('r') => {
                self.screen = Screen::Loading(Pending::Containers);
                Some(Command::LoadContainers)
            }
            Key::Esc | Key::Char('q') => Some(Command::Quit),
            _ => None,
        }
    }

    fn on_environment_key(&mut self, mut view: EnvironmentView, key: Key) -> Option<Command> {
        if let Some(prompt) = view.prompt.take() {
            return self.on_prompt_key(view, prompt, key);
        }

        match key {
            Key::Up | Key::Char('k') => view.selected = view.selected.saturating_sub(1),
            Key::Down | Key::Char('j') => {
                if view.selected + 1 < view.rows.len() {
                    view.selected += 1;
                }
            }
            Key::Enter | Key::Tab => {
                if let Some(var) = view.rows.get(view.selected) {
                    view.prompt = Some(Prompt::EditValue {
                        name: var.name.clone(),
                        input: var.value.clone(),
                    });
                }
            }
            Key::Char('a') | Key::Char('n') | Key::Char('o') => {
                view.prompt = Some(Prompt::NewName {
                    input: String::new(),
                });
            }
            Key::Esc => return None,
            Key::Char('q') => return Some(Command::Quit),
            _ => {}
        }

        self.screen = Screen::Environment(view);
        None
    }

    fn on_prompt_key(
        &mut self,
        mut view: EnvironmentView,
        mut prompt: Prompt,
        key: Key,
    ) -> Option<Command> {
        match key {
            Key::Esc => {
                self.screen = Screen::Environment(view);
                return None;
            }
            Key::Backspace => {
                prompt.input_mut().pop();
            }
            Key::Char(c) => prompt.input_mut().push(c),
            Key::Enter => match prompt {
                Prompt::EditValue { name, input } | Prompt::NewValue { name, input } => {
                    return self.submit(view, name, input);
                }
                Prompt::NewName { input } => match validate_name(&input) {
                    Ok(()) => {
                        self.error = None;
                        prompt = Prompt::NewValue {
                            name: input,
                            input: String::new(),
                        };
                    }
                    Err(err) => {
                        self.error = Some(err.to_string());
                        prompt = Prompt::NewName { input };
                    }
                },
            },
            _ => {}
        }

        view.prompt = Some(prompt);
        self.screen = Screen::Environment(view);
        None
    }

    fn submit(&mut self, view: EnvironmentView, name: String, value: String) -> Option<Command> {
        match EnvironmentAssertion::new(name.clone(), value) {
            Ok(assertion) => {
                self.error = None;
                self.notice = None;
                let container_id = view.container_id.clone();
                self.screen = Screen::Loading(Pending::Mutation {
                    view,
                    variable: name,
                });
                Some(Command::ApplyMutation {
                    container_id,
                    assertion,
                })
            }
            Err(err) => {
                self.error = Some(err.to_string());
                self.screen = Screen::Environment(view);
                None
            }
        }
    }

    fn on_containers_loaded(&mut self, rows: Vec<ContainerSummary>) -> Option<Command> {
        self.containers = rows;
        self.selected = self.selected.min(self.containers.len().saturating_sub(1));
        if self.screen == Screen::Loading(Pending::Containers) {
            self.screen = Screen::Containers;
        }
        None
    }

    fn on_snapshot(&mut self, container_id: String, environment: Vec<EnvVar>) -> Option<Command> {
        let expected = matches!(
            &self.screen,
            Screen::Loading(Pending::Snapshot { container_id: pending }) if *pending == container_id
        );
        if !expected {
            debug!("Ignoring stale snapshot for {}", container_id);
            return None;
        }

        let container_name = self
            .containers
            .iter()
            .find(|c| c.id == container_id)
            .map(ContainerSummary::display_name)
            .unwrap_or_else(|| short_id(&container_id).to_string());
        self.screen = Screen::Environment(EnvironmentView {
            container_id,
            container_name,
            rows: environment,
            selected: 0,
            prompt: None,
        });
        None
    }

    fn on_mutation(&mut self, container_id: String, result: MutationResult) -> Option<Command> {
        let (view, variable) = match std::mem::replace(&mut self.screen, Screen::Containers) {
            Screen::Loading(Pending::Mutation { view, variable })
                if view.container_id == container_id =>
            {
                (view, variable)
            }
            other => {
                debug!("Ignoring stale mutation result for {}", container_id);
                self.screen = other;
                return None;
            }
        };

        let quit = self.quit_requested.then_some(Command::Quit);
        match result {
            Ok(report) => {
                if let Some(index) = replace_id(&mut self.containers, &report.old_id, &report.new_id)
                {
                    self.selected = index;
                }
                self.notice = Some(if report.recreated {
                    format!(
                        "{}: {} applied, new id {}",
                        report.name,
                        variable,
                        short_id(&report.new_id)
                    )
                } else {
                    format!("{}: {} unchanged", report.name, variable)
                });
                self.screen = Screen::Containers;
                quit
            }
            Err(err) => {
                self.error = Some(format!("{} ({})", err, err.recovery_hint()));
                if quit.is_some() {
                    return quit;
                }
                if err.left_untouched() {
                    self.screen = Screen::Environment(view);
                    None
                } else {
                    self.screen = Screen::Loading(Pending::Containers);
                    Some(Command::LoadContainers)
                }
            }
        }
    }

    fn on_runtime_error(&mut self, err: RuntimeError) -> Option<Command> {
        self.error = Some(err.to_string());
        self.screen = match std::mem::replace(&mut self.screen, Screen::Containers) {
            Screen::Loading(Pending::Mutation { view, .. }) => Screen::Environment(view),
            Screen::Loading(_) => Screen::Containers,
            other => other,
        };
        None
    }
}
