use iocraft::prelude::*;
use std::time::SystemTime;
use tokio::sync::watch;

use crate::rest_types::TaskStatus;

#[derive(Default, Props)]
pub struct ProgressBarProps {
    pub title: String,
    pub progress: Option<watch::Receiver<f32>>,
}

#[component]
pub fn ProgressBar(props: &ProgressBarProps, mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let mut progress = hooks.use_state(|| 0.0f32);
    let receiver = props.progress.clone();

    hooks.use_future(async move {
        let Some(mut receiver) = receiver else {
            return;
        };
        while receiver.changed().await.is_ok() {
            let percent = *receiver.borrow();
            progress.set(percent.clamp(0.0, 100.0));
        }
    });

    element! {
        View(flex_direction: FlexDirection::Column) {
            Text(content: &props.title, weight: Weight::Bold)
            View(flex_direction: FlexDirection::Row) {
                View(border_style: BorderStyle::Round, border_color: Color::Blue, width: 60) {
                    View(width: Percent(progress.get()), height: 1, background_color: Color::Green)
                }
                View(padding: 1) {
                    Text(content: format!("{:.0}%", progress.get()))
                }
            }
        }
    }
}

#[derive(Default, Props)]
pub struct TaskStatusViewProps {
    pub task_id: String,
    pub task_type: Option<String>,
    pub started: Option<SystemTime>,
    pub status: Option<TaskStatus>,
    pub percent_complete: Option<i32>,
    pub entry_id: Option<i64>,
    pub errors: Vec<String>,
}

#[derive(Default, Props)]
struct StatusIconProps {
    status: Option<TaskStatus>,
}

#[component]
fn StatusIcon(props: &StatusIconProps) -> impl Into<AnyElement<'static>> {
    match props.status {
        Some(TaskStatus::Queued) => element! {
            Text (
                color: Color::Reset,
                content: "◇"
            )
        }
        .into_any(),
        Some(TaskStatus::InProgress) => element! {
            Spinner()
        }
        .into_any(),
        Some(TaskStatus::Completed) => element! {
            Text (
                color: Color::Green,
                content: "◆"
            )
        }
        .into_any(),
        Some(TaskStatus::Cancelled) => element! {
            Text (
                color: Color::Red,
                content: "■"
            )
        }
        .into_any(),
        Some(TaskStatus::Failed) => element! {
            Text (
                color: Color::Red,
                content: "▲"
            )
        }
        .into_any(),
        _ => element! {
            Text (
                color: Color::Yellow,
                content: "❓"
            )
        }
        .into_any(),
    }
}

#[component]
pub fn TaskStatusView(props: &TaskStatusViewProps) -> impl Into<AnyElement<'static>> {
    let status = props
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "Not found".to_string());
    let progress = props
        .percent_complete
        .map(|p| format!(" ({}%)", p))
        .unwrap_or_default();

    element! {
        View(flex_direction: FlexDirection::Column) {
            View(flex_direction: FlexDirection::Row) {
                Text(content: "┌ ")
                View(background_color: Color::Blue) {
                    Text(content: format!("Task {}", props.task_id), color: Color::White)
                }
            }
            #(props.task_type.as_ref().map(|task_type| element! {
                Text(content: format!("│ {}", task_type))
            }))
            #(props.started.map(|started| element! {
                Text(content: format!("│ Started {}", humantime::format_rfc3339_seconds(started)))
            }))
            Text(content: "│")
            View(flex_direction: FlexDirection::Row) {
                StatusIcon(status: props.status)
                Text(weight: Weight::Bold, content: format!(" {}{}", status, progress))
            }
            #(props.entry_id.map(|id| element! {
                Text(content: format!("│ Entry ID: {}", id))
            }))
            #(props.errors.iter().map(|error| element! {
                Text(content: format!("│ {}", error), color: Color::Red)
            }))
            Text(content: "└")
        }
    }
}

#[derive(Default, Props)]
pub struct SpinnerProps {
    pub color: Option<Color>,
}

#[component]
pub fn Spinner(props: &SpinnerProps, mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let mut frame = hooks.use_state(|| 0usize);

    hooks.use_future(async move {
        loop {
            tokio::time::sleep(tokio::time::Duration::from_millis(250)).await;
            frame.set((frame.get() + 1) % 4);
        }
    });

    let spinner_chars = ["◐", "◓", "◑", "◒"];
    let current_char = spinner_chars[*frame.read()];
    let color = props.color.unwrap_or(Color::Cyan);

    element! {
        Text(content: current_char, color: color)
    }
}

#[derive(Default, Props)]
pub struct MessageProps {
    pub message: String,
}

#[component]
pub fn SuccessMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(content: "◆ ", color: Color::Green)
            Text(content: &props.message)
        }
    }
}

#[component]
pub fn WarningMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(content: "◇ ", color: Color::Yellow)
            Text(content: &props.message)
        }
    }
}

#[component]
pub fn ErrorMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(content: "▲ ", color: Color::Red)
            Text(content: &props.message, color: Color::Red)
        }
    }
}

#[component]
pub fn ConfigHeader() -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column, margin_bottom: 1) {
            Text(content: "repo-import configuration", weight: Weight::Bold)
            Text(content: "Press enter to accept the value in brackets.")
        }
    }
}

#[derive(Default, Props)]
pub struct InputPromptProps {
    pub prompt: String,
    pub default: Option<String>,
    pub description: Option<String>,
}

#[component]
pub fn InputPrompt(props: &InputPromptProps) -> impl Into<AnyElement<'static>> {
    let prompt = match &props.default {
        Some(default) => format!("{} [{}]", props.prompt, default),
        None => props.prompt.clone(),
    };

    element! {
        View(flex_direction: FlexDirection::Column) {
            Text(content: prompt, weight: Weight::Bold)
            #(props.description.as_ref().map(|description| element! {
                Text(content: description, color: Color::DarkGrey)
            }))
        }
    }
}
