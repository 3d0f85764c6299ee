//! Regex-fallback code analyzer.
//!
//! A language-tolerant extractor used when no dedicated analyzer adapter is
//! registered for a language. It recognizes common function, class, route,
//! and HTML form patterns; elements it emits carry the "regex-fallback"
//! analysis method so downstream consumers can weigh them accordingly.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::Result;
use crate::model::bundle::CodeFile;
use crate::model::representation::{
    ApiEndpoint, BackendFunction, ComplexityBand, DataField, DataStructure, Parameter,
    Representation, UiElement,
};
use crate::model::scope::ValidationScope;

use super::analyzer::CodeAnalyzer;

struct Patterns {
    python_function: Regex,
    js_function: Regex,
    js_arrow: Regex,
    jvm_method: Regex,
    python_class: Regex,
    python_field: Regex,
    jvm_field: Regex,
    flask_route: Regex,
    spring_route: Regex,
    express_route: Regex,
    html_tag: Regex,
    html_attribute: Regex,
    html_button_text: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        python_function: Regex::new(
            r#"(?m)^\s*def\s+(\w+)\s*\(([^)]*)\)\s*(?:->\s*([\w\[\], \.]+))?\s*:"#,
        )
        .unwrap(),
        js_function: Regex::new(r#"(?m)function\s+(\w+)\s*\(([^)]*)\)"#).unwrap(),
        js_arrow: Regex::new(r#"(?m)(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s+)?\(([^)]*)\)\s*=>"#)
            .unwrap(),
        jvm_method: Regex::new(
            r#"(?m)(?:public|private|protected)\s+(?:static\s+)?([\w<>\[\],\. ]+?)\s+(\w+)\s*\(([^)]*)\)\s*\{"#,
        )
        .unwrap(),
        python_class: Regex::new(r#"(?m)^class\s+(\w+)[^:]*:"#).unwrap(),
        python_field: Regex::new(r#"(?m)^\s{4}(\w+)\s*:\s*([\w\[\], \.]+?)\s*(?:=.*)?$"#).unwrap(),
        jvm_field: Regex::new(r#"(?m)(?:private|protected|public)\s+([\w<>\[\],\. ]+?)\s+(\w+)\s*;"#)
            .unwrap(),
        flask_route: Regex::new(
            r#"@(?:app|blueprint|bp|router)\.(?:route|get|post|put|delete|patch)\(\s*["']([^"']+)["'](?:[^)]*methods\s*=\s*\[([^\]]*)\])?[^)]*\)\s*(?:\r?\n\s*(?:async\s+)?def\s+(\w+))?"#,
        )
        .unwrap(),
        spring_route: Regex::new(
            r#"@(Get|Post|Put|Delete|Patch|Request)Mapping\(\s*(?:value\s*=\s*)?["']([^"']+)["'][^)]*\)\s*(?:\r?\n\s*(?:public|private|protected)[^(]*?(\w+)\s*\()?"#,
        )
        .unwrap(),
        express_route: Regex::new(
            r#"(?:app|router)\.(get|post|put|delete|patch)\(\s*["']([^"']+)["']\s*,\s*(\w+)?"#,
        )
        .unwrap(),
        html_tag: Regex::new(r#"<(input|button|select|textarea|label|form|a)\b([^>]*)>"#).unwrap(),
        html_attribute: Regex::new(r#"([\w-]+)\s*=\s*["']([^"']*)["']"#).unwrap(),
        html_button_text: Regex::new(r#"<(?:button|label|a)\b[^>]*>([^<]+)<"#).unwrap(),
    })
}

/// Last-resort extractor registered as the registry fallback.
pub struct RegexFallbackAnalyzer;

impl RegexFallbackAnalyzer {
    fn parse_python_params(raw: &str) -> Vec<Parameter> {
        raw.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != "self" && *p != "cls")
            .map(|p| {
                let (name, type_name) = match p.split_once(':') {
                    Some((name, rest)) => {
                        let type_name = rest.split('=').next().unwrap_or("any").trim();
                        (name.trim(), type_name)
                    }
                    None => (p.split('=').next().unwrap_or(p).trim(), "any"),
                };
                Parameter::new(name, type_name)
            })
            .collect()
    }

    fn parse_jvm_params(raw: &str) -> Vec<Parameter> {
        raw.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .filter_map(|p| {
                let mut parts = p.rsplitn(2, ' ');
                let name = parts.next()?.trim();
                let type_name = parts.next().unwrap_or("any").trim();
                Some(Parameter::new(name, type_name))
            })
            .collect()
    }

    fn extract_functions(&self, content: &str, out: &mut Representation) {
        let patterns = patterns();

        for captures in patterns.python_function.captures_iter(content) {
            let name = captures[1].to_string();
            if name.starts_with("__") {
                continue;
            }
            let parameters = Self::parse_python_params(&captures[2]);
            let complexity = if parameters.len() > 3 {
                ComplexityBand::Medium
            } else {
                ComplexityBand::Low
            };
            out.backend_functions.push(BackendFunction {
                name,
                parameters,
                return_type: captures.get(3).map(|m| m.as_str().trim().to_string()),
                http_method: None,
                route: None,
                logic_summary: String::new(),
                complexity,
                analysis_method: Some("regex-fallback".to_string()),
            });
        }

        for captures in patterns
            .js_function
            .captures_iter(content)
            .chain(patterns.js_arrow.captures_iter(content))
        {
            let name = captures[1].to_string();
            let parameters: Vec<Parameter> = captures[2]
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| Parameter::new(p.split(':').next().unwrap_or(p).trim(), "any"))
                .collect();
            out.backend_functions.push(BackendFunction {
                name,
                parameters,
                return_type: None,
                http_method: None,
                route: None,
                logic_summary: String::new(),
                complexity: ComplexityBand::Low,
                analysis_method: Some("regex-fallback".to_string()),
            });
        }

        for captures in patterns.jvm_method.captures_iter(content) {
            let return_type = captures[1].trim().to_string();
            let name = captures[2].to_string();
            if return_type == "class" || name == "if" || name == "while" || name == "for" {
                continue;
            }
            out.backend_functions.push(BackendFunction {
                name,
                parameters: Self::parse_jvm_params(&captures[3]),
                return_type: (return_type != "void").then_some(return_type),
                http_method: None,
                route: None,
                logic_summary: String::new(),
                complexity: ComplexityBand::Low,
                analysis_method: Some("regex-fallback".to_string()),
            });
        }
    }

    fn extract_structures(&self, content: &str, out: &mut Representation) {
        let patterns = patterns();

        // Python classes with annotated fields in their body.
        let class_starts: Vec<(usize, String)> = patterns
            .python_class
            .captures_iter(content)
            .filter_map(|c| Some((c.get(0)?.start(), c[1].to_string())))
            .collect();
        for (index, (start, name)) in class_starts.iter().enumerate() {
            let end = class_starts
                .get(index + 1)
                .map(|(next, _)| *next)
                .unwrap_or(content.len());
            let body = &content[*start..end];
            let fields: Vec<DataField> = patterns
                .python_field
                .captures_iter(body)
                .map(|c| DataField {
                    name: c[1].to_string(),
                    type_name: c[2].trim().to_string(),
                    required: !c[2].trim().starts_with("Optional"),
                    constraints: Vec::new(),
                })
                .collect();
            if !fields.is_empty() {
                out.data_structures.push(DataStructure {
                    name: name.clone(),
                    kind: "class".to_string(),
                    fields,
                    analysis_method: Some("regex-fallback".to_string()),
                });
            }
        }

        // Java/C# classes with private fields.
        if content.contains("class ") {
            let fields: Vec<DataField> = patterns
                .jvm_field
                .captures_iter(content)
                .map(|c| DataField {
                    name: c[2].to_string(),
                    type_name: c[1].trim().to_string(),
                    required: true,
                    constraints: Vec::new(),
                })
                .collect();
            if !fields.is_empty() && out.data_structures.is_empty() {
                // Attribute fields to the first class name found.
                if let Some(captures) = Regex::new(r#"class\s+(\w+)"#)
                    .ok()
                    .and_then(|r| r.captures(content))
                {
                    out.data_structures.push(DataStructure {
                        name: captures[1].to_string(),
                        kind: "class".to_string(),
                        fields,
                        analysis_method: Some("regex-fallback".to_string()),
                    });
                }
            }
        }
    }

    fn extract_endpoints(&self, content: &str, out: &mut Representation) {
        let patterns = patterns();

        for captures in patterns.flask_route.captures_iter(content) {
            let path = captures[1].to_string();
            let methods: Vec<String> = captures
                .get(2)
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .map(|s| s.trim().trim_matches(['"', '\'']).to_uppercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(|| vec!["GET".to_string()]);
            let handler = captures
                .get(3)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "handler".to_string());
            out.api_endpoints.push(ApiEndpoint {
                path,
                methods,
                handler,
                analysis_method: Some("regex-fallback".to_string()),
            });
        }

        for captures in patterns.spring_route.captures_iter(content) {
            let method = match &captures[1] {
                "Request" => "GET".to_string(),
                verb => verb.to_uppercase(),
            };
            out.api_endpoints.push(ApiEndpoint {
                path: captures[2].to_string(),
                methods: vec![method],
                handler: captures
                    .get(3)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| "handler".to_string()),
                analysis_method: Some("regex-fallback".to_string()),
            });
        }

        for captures in patterns.express_route.captures_iter(content) {
            out.api_endpoints.push(ApiEndpoint {
                path: captures[2].to_string(),
                methods: vec![captures[1].to_uppercase()],
                handler: captures
                    .get(3)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| "handler".to_string()),
                analysis_method: Some("regex-fallback".to_string()),
            });
        }
    }

    fn extract_ui_elements(&self, content: &str, out: &mut Representation) {
        let patterns = patterns();

        for captures in patterns.html_tag.captures_iter(content) {
            let kind = captures[1].to_string();
            let raw_attributes = &captures[2];

            let mut attributes = std::collections::BTreeMap::new();
            for attr in patterns.html_attribute.captures_iter(raw_attributes) {
                attributes.insert(attr[1].to_lowercase(), attr[2].to_string());
            }

            let id = attributes
                .get("id")
                .or_else(|| attributes.get("name"))
                .cloned()
                .unwrap_or_else(|| format!("{}_{}", kind, out.ui_elements.len()));

            let text = attributes
                .get("value")
                .or_else(|| attributes.get("placeholder"))
                .cloned()
                .unwrap_or_default();

            out.ui_elements.push(UiElement {
                kind,
                id,
                text,
                attributes,
                analysis_method: Some("regex-fallback".to_string()),
            });
        }

        // Inner text of buttons/labels/links beats attribute-derived text.
        let mut texts = patterns.html_button_text.captures_iter(content);
        for element in out
            .ui_elements
            .iter_mut()
            .filter(|e| matches!(e.kind.as_str(), "button" | "label" | "a"))
        {
            if let Some(captures) = texts.next() {
                let text = captures[1].trim().to_string();
                if !text.is_empty() {
                    element.text = text;
                }
            }
        }
    }
}

#[async_trait]
impl CodeAnalyzer for RegexFallbackAnalyzer {
    async fn analyze(&self, file: &CodeFile, scope: ValidationScope) -> Result<Representation> {
        let mut out = Representation::new();
        let content = &file.content;

        if scope != ValidationScope::Ui {
            self.extract_functions(content, &mut out);
            self.extract_structures(content, &mut out);
            self.extract_endpoints(content, &mut out);
        }
        self.extract_ui_elements(content, &mut out);

        // Identifier collisions across patterns get disambiguated by suffix.
        dedupe_ids(&mut out);
        Ok(out)
    }

    fn language(&self) -> &str {
        "any"
    }

    fn method(&self) -> &str {
        "regex-fallback"
    }
}

fn dedupe_ids(representation: &mut Representation) {
    let mut seen = std::collections::HashMap::new();
    for element in &mut representation.ui_elements {
        let count = seen.entry(element.id.clone()).or_insert(0usize);
        if *count > 0 {
            element.id = format!("{}_{}", element.id, count);
        }
        *count += 1;
    }

    let mut seen = std::collections::HashMap::new();
    for function in &mut representation.backend_functions {
        let count = seen.entry(function.name.clone()).or_insert(0usize);
        if *count > 0 {
            function.name = format!("{}_{}", function.name, count);
        }
        *count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn analyze(path: &str, language: &str, content: &str) -> Representation {
        RegexFallbackAnalyzer
            .analyze(
                &CodeFile::new(path, language, content),
                ValidationScope::Full,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_python_functions_extracted() {
        let rep = analyze(
            "app.py",
            "python",
            r#"
def calculate_total(order_id: int, tax_rate: float = 0.2) -> float:
    return 0.0

def __private_helper():
    pass

class OrderService:
    def fetch(self, order_id: int):
        pass
"#,
        )
        .await;

        let names: Vec<&str> = rep
            .backend_functions
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert!(names.contains(&"calculate_total"));
        assert!(names.contains(&"fetch"));
        assert!(!names.iter().any(|n| n.starts_with("__")));

        let calc = rep
            .backend_functions
            .iter()
            .find(|f| f.name == "calculate_total")
            .unwrap();
        assert_eq!(calc.parameters.len(), 2);
        assert_eq!(calc.parameters[0].type_name, "int");
        assert_eq!(calc.return_type.as_deref(), Some("float"));
    }

    #[tokio::test]
    async fn test_python_dataclass_fields() {
        let rep = analyze(
            "models.py",
            "python",
            r#"
class Product:
    name: str
    price: float
    stock: int = 0

class Empty:
    pass
"#,
        )
        .await;

        assert_eq!(rep.data_structures.len(), 1);
        let product = &rep.data_structures[0];
        assert_eq!(product.name, "Product");
        assert_eq!(product.fields.len(), 3);
        assert_eq!(product.fields[1].type_name, "float");
    }

    #[tokio::test]
    async fn test_flask_routes() {
        let rep = analyze(
            "routes.py",
            "python",
            r#"
@app.route("/api/products", methods=["GET", "POST"])
def list_products():
    pass
"#,
        )
        .await;

        assert_eq!(rep.api_endpoints.len(), 1);
        let endpoint = &rep.api_endpoints[0];
        assert_eq!(endpoint.path, "/api/products");
        assert_eq!(endpoint.methods, vec!["GET", "POST"]);
        assert_eq!(endpoint.handler, "list_products");
    }

    #[tokio::test]
    async fn test_spring_and_express_routes() {
        let java = analyze(
            "Controller.java",
            "java",
            r#"
@GetMapping("/api/users")
public List<User> listUsers() {
    return repo.findAll();
}
"#,
        )
        .await;
        assert_eq!(java.api_endpoints[0].path, "/api/users");
        assert_eq!(java.api_endpoints[0].methods, vec!["GET"]);

        let js = analyze(
            "routes.js",
            "javascript",
            r#"app.post('/api/orders', createOrder);"#,
        )
        .await;
        assert_eq!(js.api_endpoints[0].methods, vec!["POST"]);
        assert_eq!(js.api_endpoints[0].handler, "createOrder");
    }

    #[tokio::test]
    async fn test_html_form_elements() {
        let rep = analyze(
            "login.html",
            "html",
            r#"
<form id="login_form">
  <input type="text" id="user_name" placeholder="User Name" required="true">
  <button id="submit_btn">Submit</button>
</form>
"#,
        )
        .await;

        let input = rep.ui_elements.iter().find(|e| e.id == "user_name").unwrap();
        assert_eq!(input.kind, "input");
        assert_eq!(input.attributes.get("required").unwrap(), "true");

        let button = rep.ui_elements.iter().find(|e| e.id == "submit_btn").unwrap();
        assert_eq!(button.text, "Submit");
    }

    #[tokio::test]
    async fn test_ui_scope_skips_backend_extraction() {
        let rep = RegexFallbackAnalyzer
            .analyze(
                &CodeFile::new(
                    "page.py",
                    "python",
                    "def handler():\n    pass\n",
                ),
                ValidationScope::Ui,
            )
            .await
            .unwrap();
        assert!(rep.backend_functions.is_empty());
    }

    #[tokio::test]
    async fn test_emitted_ids_are_unique() {
        let rep = analyze(
            "page.html",
            "html",
            r#"<input type="text"><input type="text">"#,
        )
        .await;
        assert!(rep.validate().is_ok());
    }
}
