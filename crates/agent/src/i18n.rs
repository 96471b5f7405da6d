//! Locale message tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported UI and prompt languages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    #[default]
    Cn,
    En,
}

/// Fixed strings shown to a human watching a task.
#[derive(Debug, Clone, Copy)]
pub struct Messages {
    pub thinking: &'static str,
    pub action: &'static str,
    pub task_completed: &'static str,
    pub done: &'static str,
    pub step: &'static str,
    pub performance_metrics: &'static str,
    pub time_to_first_token: &'static str,
    pub time_to_thinking_end: &'static str,
    pub total_inference_time: &'static str,
    pub max_steps_reached: &'static str,
}

const CN: Messages = Messages {
    thinking: "思考过程",
    action: "执行动作",
    task_completed: "任务完成",
    done: "完成",
    step: "步骤",
    performance_metrics: "性能指标",
    time_to_first_token: "首 Token 延迟",
    time_to_thinking_end: "思考完成延迟",
    total_inference_time: "总推理时间",
    max_steps_reached: "已达到最大步数",
};

const EN: Messages = Messages {
    thinking: "Thinking",
    action: "Action",
    task_completed: "Task Completed",
    done: "Done",
    step: "Step",
    performance_metrics: "Performance Metrics",
    time_to_first_token: "Time to first token",
    time_to_thinking_end: "Time to thinking end",
    total_inference_time: "Total inference time",
    max_steps_reached: "Max steps reached",
};

impl Lang {
    pub fn messages(self) -> &'static Messages {
        match self {
            Self::Cn => &CN,
            Self::En => &EN,
        }
    }

    /// Advisory text telling the model it has repeated itself.
    ///
    /// `target` may be empty, in which case it is left out.
    pub fn retry_note(self, kind: &str, target: &str, count: u32) -> String {
        let target = if target.is_empty() {
            String::new()
        } else {
            format!(" {target}")
        };
        match self {
            Self::Cn => format!("已尝试 {kind}{target} 共 {count} 次，界面未变化/状态仍未达成"),
            Self::En => format!("attempted {kind}{target} {count} times; state unchanged"),
        }
    }

    /// Clause appended to the retry note once the threshold is reached.
    pub fn escalation(self) -> &'static str {
        match self {
            Self::Cn => "。请考虑其他策略或调用 finish 请求人工接管。",
            Self::En => "; consider a different strategy or call finish to request a human takeover.",
        }
    }
}

impl FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cn" | "zh" => Ok(Self::Cn),
            "en" => Ok(Self::En),
            other => Err(format!("unsupported language: {other}")),
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cn => "cn",
            Self::En => "en",
        })
    }
}
