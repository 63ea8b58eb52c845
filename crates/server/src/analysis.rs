use crate::models::SelectedAnswer;
use crate::provider::{ChatMessage, ChatProvider, TextStream};
use futures::{StreamExt, future, stream, stream::BoxStream};
use std::sync::Arc;

pub const SYSTEM_PROMPT: &str = "Ты — опытный аналитик отдела продаж. Ты разбираешь ответы \
менеджеров по продажам на тестовые ситуации, оцениваешь их качество и даёшь практичные рекомендации.";
const CONTEXT_HEADER: &str = "\n\nОтветы для анализа:\n\n";
const UNKNOWN: &str = "Неизвестно";

pub enum AnalyzeError {
    EmptySelection,
    Provider(anyhow::Error),
}

fn field(value: &Option<String>) -> &str {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN)
}

/// One numbered paragraph per answer, in input order.
pub fn build_context(answers: &[SelectedAnswer]) -> String {
    answers
        .iter()
        .enumerate()
        .map(|(i, answer)| {
            format!(
                "{}. Сотрудник: {}\nТема: {}\nОтвет сотрудника: {}\nОценка системы: {}",
                i + 1,
                field(&answer.full_name),
                field(&answer.theme_name),
                field(&answer.user_answer),
                field(&answer.result),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_messages(answers: &[SelectedAnswer], prompt: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!("{prompt}{CONTEXT_HEADER}{}", build_context(answers))),
    ]
}

/// Forwards text chunks until the upstream ends. The first upstream error is
/// turned into a final readable chunk and nothing is polled after it.
pub fn relay(upstream: TextStream) -> BoxStream<'static, String> {
    stream::unfold(Some(upstream), |state| async move {
        let mut upstream = state?;
        match upstream.next().await? {
            Ok(chunk) => Some((chunk, Some(upstream))),
            Err(err) => {
                tracing::error!("Analysis stream failed: {:#}", err);
                Some((format!("\n\n[Ошибка анализа: {err:#}]"), None))
            }
        }
    })
    .filter(|chunk| future::ready(!chunk.is_empty()))
    .boxed()
}

pub struct AnalysisStreamProxy {
    provider: Arc<dyn ChatProvider>,
}

impl AnalysisStreamProxy {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_configured(&self) -> bool {
        self.provider.is_configured()
    }

    pub async fn analyze(
        &self,
        answers: &[SelectedAnswer],
        prompt: &str,
    ) -> Result<BoxStream<'static, String>, AnalyzeError> {
        if answers.is_empty() {
            return Err(AnalyzeError::EmptySelection);
        }

        let messages = build_messages(answers, prompt);
        tracing::info!(answers = answers.len(), "Starting analysis");

        let upstream = self
            .provider
            .stream_chat(messages)
            .await
            .map_err(AnalyzeError::Provider)?;
        Ok(relay(upstream))
    }
}

#[cfg(test)]
pub mod scripted {
    use super::*;
    use crate::provider::ChatMessage;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub enum Step {
        Chunk(&'static str),
        Fail(&'static str),
    }

    /// Replays a fixed script of chunks and records what it was asked.
    pub struct ScriptedProvider {
        script: Vec<Step>,
        refuse: Option<&'static str>,
        pub calls: AtomicUsize,
        pub last_messages: Mutex<Vec<ChatMessage>>,
    }

    impl ScriptedProvider {
        pub fn new(script: Vec<Step>) -> Self {
            Self {
                script,
                refuse: None,
                calls: AtomicUsize::new(0),
                last_messages: Mutex::new(Vec::new()),
            }
        }

        pub fn refusing(message: &'static str) -> Self {
            Self {
                refuse: Some(message),
                ..Self::new(Vec::new())
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn stream_chat(&self, messages: Vec<ChatMessage>) -> anyhow::Result<TextStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_messages.lock().unwrap() = messages;
            if let Some(message) = self.refuse {
                return Err(anyhow!(message));
            }
            let items: Vec<anyhow::Result<String>> = self
                .script
                .iter()
                .map(|step| match step {
                    Step::Chunk(text) => Ok(text.to_string()),
                    Step::Fail(message) => Err(anyhow!(*message)),
                })
                .collect();
            Ok(stream::iter(items).boxed())
        }

        fn is_configured(&self) -> bool {
            true
        }
    }
}
