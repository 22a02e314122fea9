use std::fmt::Write as _;

use lifelens_contracts::{Category, DecisionContext, ImageDescriptor};

use crate::fallback::MoodBucket;

/// Builds the reasoning prompt. Pure: identical inputs give byte-identical
/// output.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, descriptors: &[ImageDescriptor], context: &DecisionContext) -> String {
        let count = descriptors.len();
        let mut out = String::new();
        out.push_str(
            "You are LifeLens, a practical decision assistant. Rank the user's options for their question and recommend exactly one.\n\n",
        );

        let _ = writeln!(out, "QUESTION: {}", context.question.trim());
        let _ = writeln!(
            out,
            "CATEGORY: {}",
            context.category.map(Category::as_str).unwrap_or("unspecified")
        );
        let _ = writeln!(
            out,
            "MOOD: {}",
            context.mood.as_deref().unwrap_or("not provided")
        );
        match &context.weather {
            Some(weather) => {
                let mut line = weather.description.trim().to_string();
                if let Some(temperature) = weather.temperature {
                    let _ = write!(line, ", {temperature:.1}°C");
                }
                if let Some(humidity) = weather.humidity {
                    let _ = write!(line, ", {humidity:.0}% humidity");
                }
                let _ = writeln!(out, "WEATHER: {line}");
            }
            None => out.push_str("WEATHER: not provided\n"),
        }

        let _ = writeln!(out, "\nOPTIONS ({count}):");
        for (index, descriptor) in descriptors.iter().enumerate() {
            let _ = writeln!(out, "[{index}] label: \"{}\"", descriptor.label.trim());
            let _ = writeln!(out, "    description: {}", descriptor.description.trim());
            if !descriptor.success {
                out.push_str("    note: no visual analysis was available; rely on the label\n");
            }
        }

        out.push_str("\nRULES:\n");
        out.push_str("- Each option's label was typed by the user and is authoritative. When a description disagrees with its label, trust the label.\n");
        for rule in category_rules(context.category) {
            let _ = writeln!(out, "- {rule}");
        }

        out.push_str("\nMOOD RUBRIC:\n");
        out.push_str("- happy / energetic / excited: favor bold, vibrant, adventurous options.\n");
        out.push_str("- sad / down / tired: favor comforting, low-effort, familiar options.\n");
        out.push_str("- stressed / anxious: favor calm, simple, predictable options.\n");
        out.push_str("- no mood or anything else: judge on fit with the question and context only.\n");
        let _ = writeln!(
            out,
            "Current mood reading: {}.",
            MoodBucket::classify(context.mood.as_deref()).as_str()
        );

        let last = count.saturating_sub(1);
        out.push_str("\nOUTPUT FORMAT:\nRespond with one JSON object and nothing else (no markdown, no code fences):\n");
        let _ = writeln!(
            out,
            "{{\"recommendedIndex\": <integer 0..{last}>, \"ranked\": [{{\"index\": <integer>, \"label\": <string>, \"score\": <number 0..1>, \"reason\": <string>}}], \"reasoning\": <string>, \"confidence\": <number 0..1>, \"factors\": {{<string>: <number 0..1>}}}}"
        );
        let _ = writeln!(
            out,
            "\"ranked\" must contain every index from 0 to {last} exactly once, sorted by score from highest to lowest, and \"recommendedIndex\" must equal the first entry's index."
        );
        out
    }
}

fn category_rules(category: Option<Category>) -> &'static [&'static str] {
    match category {
        Some(Category::Clothing) => &[
            "Judge the garment itself. Ignore backgrounds, mannequins, hangers, store shelves and display context.",
            "Weigh weather suitability (warmth, rain, humidity) and the occasion implied by the question.",
        ],
        Some(Category::Food) => &[
            "Judge the food or drink itself, not plating, table setting or restaurant decor.",
            "Weigh how filling, fresh and appropriate for the time of day each option is.",
        ],
        Some(Category::Activity) => &[
            "Judge the activity, not the photo quality or who appears in it.",
            "Weigh weather, energy required and indoor versus outdoor setting.",
        ],
        Some(Category::Work) => &[
            "Judge the task or tool for productivity and focus, not the aesthetics of the workspace.",
        ],
        Some(Category::Social) => &[
            "Judge the plan or venue for atmosphere and group fit, not incidental people in the photo.",
        ],
        Some(Category::Other) | None => &[
            "Judge each option on its main subject; ignore incidental background details.",
        ],
    }
}

#[cfg(test)]
mod tests {
    use lifelens_contracts::{
        Category, DecisionContext, ImageDescriptor, SourceProvider, Tier, Weather,
    };

    use super::PromptBuilder;

    fn descriptors() -> Vec<ImageDescriptor> {
        vec![
            ImageDescriptor::described("Blue Hoodie", "A navy hoodie on a store rack", SourceProvider::OpenaiVision),
            ImageDescriptor::failed("Red Hoodie", "A clothing item or outfit: Red Hoodie"),
        ]
    }

    fn context() -> DecisionContext {
        DecisionContext {
            question: "Which hoodie should I wear today?".to_string(),
            mood: Some("happy".to_string()),
            category: Some(Category::Clothing),
            weather: Some(Weather {
                description: "light rain".to_string(),
                temperature: Some(12.0),
                humidity: Some(80.0),
            }),
            user_tier: Tier::Free,
        }
    }

    #[test]
    fn prompt_is_deterministic() {
        let builder = PromptBuilder::new();
        assert_eq!(
            builder.build(&descriptors(), &context()),
            builder.build(&descriptors(), &context())
        );
    }

    #[test]
    fn prompt_carries_context_rules_and_contract() {
        let prompt = PromptBuilder::new().build(&descriptors(), &context());
        assert!(prompt.contains("QUESTION: Which hoodie should I wear today?"));
        assert!(prompt.contains("WEATHER: light rain, 12.0°C, 80% humidity"));
        assert!(prompt.contains("[0] label: \"Blue Hoodie\""));
        assert!(prompt.contains("[1] label: \"Red Hoodie\""));
        assert!(prompt.contains("no visual analysis was available"));
        assert!(prompt.contains("Ignore backgrounds, mannequins"));
        assert!(prompt.contains("Current mood reading: bold."));
        assert!(prompt.contains("\"recommendedIndex\": <integer 0..1>"));
        assert!(prompt.contains("every index from 0 to 1 exactly once"));
    }

    #[test]
    fn missing_context_fields_are_spelled_out() {
        let mut ctx = context();
        ctx.mood = None;
        ctx.category = None;
        ctx.weather = None;
        let prompt = PromptBuilder::new().build(&descriptors(), &ctx);
        assert!(prompt.contains("CATEGORY: unspecified"));
        assert!(prompt.contains("MOOD: not provided"));
        assert!(prompt.contains("WEATHER: not provided"));
        assert!(prompt.contains("Current mood reading: neutral."));
    }
}
