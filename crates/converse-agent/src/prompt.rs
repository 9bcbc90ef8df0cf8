//! System prompt assembly from response format and collection-mode settings.

use converse_core::conversation::{CollectionMode, CollectionSettings, ResponseFormat};

const BASE_PERSONA: &str = "Ты — полезный ассистент. Отвечай на языке пользователя, \
     точно и без лишней воды. Используй доступные инструменты, когда они дают \
     более точный ответ.";

/// Builds the system prompt. Pure: identical inputs yield byte-identical
/// output.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn build(format: ResponseFormat, collection: Option<&CollectionSettings>) -> String {
        let mut prompt = String::new();

        // A non-empty custom prompt replaces the persona entirely.
        let custom = collection
            .and_then(|c| c.custom_prompt.as_deref())
            .filter(|p| !p.trim().is_empty());
        match custom {
            Some(custom) => prompt.push_str(custom),
            None => prompt.push_str(BASE_PERSONA),
        }

        prompt.push_str("\n\n");
        prompt.push_str(format_clause(format));

        if let Some(settings) = collection {
            if settings.enabled {
                prompt.push_str("\n\n");
                prompt.push_str(&collection_clause(settings));
            }
        }

        prompt
    }
}

fn format_clause(format: ResponseFormat) -> &'static str {
    match format {
        ResponseFormat::Plain => "Формат ответа: обычный текст без разметки.",
        ResponseFormat::Markdown => {
            "Формат ответа: Markdown с заголовками «## Ответ», «## Детали» и «## Итог»."
        }
        ResponseFormat::Json => {
            "Формат ответа: строго валидный JSON без пояснений вокруг, по схеме \
             {\"title\": string, \"summary\": string, \"details\": string[]}."
        }
    }
}

fn collection_clause(settings: &CollectionSettings) -> String {
    let fields = match settings.mode {
        CollectionMode::TechnicalSpec => {
            "цели, функциональные требования, ограничения, критерии приёмки"
        }
        CollectionMode::DesignBrief => "аудитория, задачи, стилистика, ограничения, референсы",
        CollectionMode::ProjectSummary => "контекст, текущий статус, риски, следующие шаги",
        CollectionMode::SolveDirect => "условие задачи, прямое решение, проверка результата",
        CollectionMode::SolveStepByStep => {
            "условие задачи, пошаговый разбор, промежуточные выводы, итоговый ответ"
        }
        CollectionMode::SolveExpertPanel => {
            "условие задачи, мнения трёх экспертов, сопоставление подходов, согласованный вывод"
        }
        CollectionMode::Custom => "поля, заданные пользовательской инструкцией",
    };

    let mut clause = format!(
        "Режим сбора информации «{}»: последовательно собери у пользователя {}.",
        settings.mode, fields
    );
    if let Some(title) = settings.result_title.as_deref().filter(|t| !t.is_empty()) {
        clause.push_str(&format!(" Итоговый документ озаглавь «{title}»."));
    }
    clause
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_yield_identical_prompts() {
        let settings = CollectionSettings {
            mode: CollectionMode::ProjectSummary,
            custom_prompt: None,
            result_title: Some("Сводка".to_string()),
            enabled: true,
        };
        let a = PromptBuilder::build(ResponseFormat::Markdown, Some(&settings));
        let b = PromptBuilder::build(ResponseFormat::Markdown, Some(&settings));
        assert_eq!(a, b);
    }

    #[test]
    fn custom_prompt_replaces_the_persona() {
        let settings = CollectionSettings {
            custom_prompt: Some("Ты — строгий ревьюер кода.".to_string()),
            ..CollectionSettings::default()
        };
        let prompt = PromptBuilder::build(ResponseFormat::Plain, Some(&settings));
        assert!(prompt.starts_with("Ты — строгий ревьюер кода."));
        assert!(!prompt.contains("полезный ассистент"));
    }

    #[test]
    fn empty_custom_prompt_keeps_the_persona() {
        let settings = CollectionSettings {
            custom_prompt: Some("   ".to_string()),
            ..CollectionSettings::default()
        };
        let prompt = PromptBuilder::build(ResponseFormat::Plain, Some(&settings));
        assert!(prompt.contains("полезный ассистент"));
    }

    #[test]
    fn format_clause_tracks_the_format() {
        assert!(PromptBuilder::build(ResponseFormat::Json, None).contains("валидный JSON"));
        assert!(PromptBuilder::build(ResponseFormat::Markdown, None).contains("Markdown"));
        assert!(PromptBuilder::build(ResponseFormat::Plain, None).contains("без разметки"));
    }

    #[test]
    fn collection_clause_appears_only_when_enabled() {
        let mut settings = CollectionSettings {
            mode: CollectionMode::TechnicalSpec,
            ..CollectionSettings::default()
        };
        let without = PromptBuilder::build(ResponseFormat::Plain, Some(&settings));
        assert!(!without.contains("Режим сбора информации"));

        settings.enabled = true;
        let with = PromptBuilder::build(ResponseFormat::Plain, Some(&settings));
        assert!(with.contains("Режим сбора информации «technical_spec»"));
        assert!(with.contains("критерии приёмки"));
    }
}
