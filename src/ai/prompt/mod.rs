//! Prompt Builder System
//!
//! Standardized prompt construction for journal analysis.
//!
//! Sections are numbered when the prompt is built, so adding or omitting an
//! optional section never leaves a gap in the numbering the model sees.

/// Prompt section types
#[derive(Debug, Clone)]
pub enum PromptSection {
    /// Opening persona and task statement
    Persona(String),
    /// Numbered section with a title and instructions
    Numbered { title: String, body: String },
    /// Text embedded verbatim between `"""` delimiters, attached to the
    /// preceding numbered section
    Quoted(String),
    /// Closing style instructions
    Closing(String),
}

/// Prompt builder for consistent prompt construction
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    sections: Vec<PromptSection>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persona(mut self, content: &str) -> Self {
        self.sections.push(PromptSection::Persona(content.to_string()));
        self
    }

    /// Add a numbered section
    pub fn numbered(mut self, title: &str, body: &str) -> Self {
        self.sections.push(PromptSection::Numbered {
            title: title.to_string(),
            body: body.to_string(),
        });
        self
    }

    /// Embed text verbatim
    pub fn quoted(mut self, content: &str) -> Self {
        self.sections.push(PromptSection::Quoted(content.to_string()));
        self
    }

    pub fn closing(mut self, content: &str) -> Self {
        self.sections.push(PromptSection::Closing(content.to_string()));
        self
    }

    /// Number of numbered sections added so far
    pub fn numbered_count(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| matches!(s, PromptSection::Numbered { .. }))
            .count()
    }

    /// Build the final prompt string
    pub fn build(self) -> String {
        let mut prompt = String::new();
        let mut number = 0;

        for section in self.sections {
            match section {
                PromptSection::Persona(content) => {
                    prompt.push_str(&content);
                    prompt.push_str("\n\n");
                }
                PromptSection::Numbered { title, body } => {
                    number += 1;
                    prompt.push_str(&format!("### {}. {}\n", number, title));
                    prompt.push_str(&body);
                    prompt.push_str("\n\n");
                }
                PromptSection::Quoted(content) => {
                    prompt.push_str("\"\"\"\n");
                    prompt.push_str(&content);
                    prompt.push_str("\n\"\"\"\n\n");
                }
                PromptSection::Closing(content) => {
                    prompt.push_str("---\n");
                    prompt.push_str(&content);
                    prompt.push_str("\n\n");
                }
            }
        }

        prompt.trim_end().to_string()
    }
}

/// Preset prompt templates
pub struct PromptTemplates;

impl PromptTemplates {
    /// Journal analysis prompt.
    ///
    /// A previous report that is missing, empty or whitespace-only is treated
    /// as absent. Otherwise it is embedded verbatim in a cross-period growth
    /// section and recommendations move from section 3 to section 4.
    pub fn journal_analysis(previous_report: Option<&str>) -> PromptBuilder {
        let mut builder = PromptBuilder::new()
            .persona(
                "你是一位溫暖而專業的心理諮商師，擅長從日記文字中理解一個人的內在狀態。\
                 請仔細閱讀附件中的日記，依照以下結構撰寫一份分析報告。",
            )
            .numbered(
                "整體情緒與狀態摘要",
                "概述這段期間日記中呈現的主要情緒、生活狀態與能量起伏。",
            )
            .numbered(
                "行為與思考模式分析",
                "指出反覆出現的行為習慣、思考傾向或人際互動模式，並引用日記中的具體內容作為依據。",
            );

        if let Some(previous) = previous_report.filter(|p| !p.trim().is_empty()) {
            builder = builder
                .numbered(
                    "跨期成長對照",
                    "以下是上一次的分析報告。請比較兩個時期的差異，指出已經出現的進步、仍在持續的課題，以及需要留意的新變化：",
                )
                .quoted(previous);
        }

        builder
            .numbered(
                "具體建議",
                "提出 3 個具體、可執行的建議，幫助作者在接下來的日子裡持續成長。",
            )
            .closing(
                "請使用繁體中文撰寫，語氣溫暖且具支持性，並以 Markdown 格式輸出（善用標題、條列與粗體標示重點）。",
            )
    }
}
