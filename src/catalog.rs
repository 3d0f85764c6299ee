//! Technology catalog: what the engine accepts as source/target contexts.

use serde::{Deserialize, Serialize};

use crate::model::scope::ValidationScope;

/// One supported technology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnologyInfo {
    pub name: String,
    pub display_name: String,
    /// "language" or "framework"
    pub kind: String,
}

impl TechnologyInfo {
    fn language(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            kind: "language".to_string(),
        }
    }

    fn framework(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            kind: "framework".to_string(),
        }
    }
}

/// Supported technologies and scopes, used for request validation and the
/// catalog endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnologyCatalog {
    pub technologies: Vec<TechnologyInfo>,
}

impl TechnologyCatalog {
    pub fn default_catalog() -> Self {
        Self {
            technologies: vec![
                TechnologyInfo::language("python", "Python"),
                TechnologyInfo::language("javascript", "JavaScript"),
                TechnologyInfo::language("typescript", "TypeScript"),
                TechnologyInfo::language("java", "Java"),
                TechnologyInfo::language("csharp", "C#"),
                TechnologyInfo::language("php", "PHP"),
                TechnologyInfo::language("ruby", "Ruby"),
                TechnologyInfo::language("go", "Go"),
                TechnologyInfo::language("rust", "Rust"),
                TechnologyInfo::language("kotlin", "Kotlin"),
                TechnologyInfo::framework("flask", "Flask"),
                TechnologyInfo::framework("django", "Django"),
                TechnologyInfo::framework("fastapi", "FastAPI"),
                TechnologyInfo::framework("spring", "Spring"),
                TechnologyInfo::framework("express", "Express"),
                TechnologyInfo::framework("react", "React"),
                TechnologyInfo::framework("angular", "Angular"),
                TechnologyInfo::framework("vue", "Vue"),
                TechnologyInfo::framework("laravel", "Laravel"),
                TechnologyInfo::framework("rails", "Ruby on Rails"),
            ],
        }
    }

    pub fn is_supported(&self, name: &str) -> bool {
        let lowered = name.to_ascii_lowercase();
        self.technologies.iter().any(|t| t.name == lowered)
    }

    pub fn scopes(&self) -> &'static [ValidationScope] {
        ValidationScope::all()
    }
}

/// Guess a language from a file path extension; the analyzer registry keys
/// on these names.
pub fn detect_language(path: &str) -> String {
    let extension = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match extension.as_str() {
        "py" => "python",
        "js" | "jsx" | "mjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "cs" => "csharp",
        "php" => "php",
        "rb" => "ruby",
        "go" => "go",
        "rs" => "rust",
        "kt" | "kts" => "kotlin",
        "html" | "htm" => "html",
        "vue" => "vue",
        _ => "unknown",
    }
    .to_string()
}
