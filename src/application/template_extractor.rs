//! Template extraction for a single fetched document
//!
//! A template is compiled once per job. Each page then runs
//! resolve → field hints → template pipeline → validation synchronously,
//! so the parsed `Html` never outlives the call.

use scraper::Html;
use tracing::{debug, warn};

use crate::domain::diagnostics::{StepFailure, Violation};
use crate::domain::extraction::{ExtractionRecord, Resolution};
use crate::domain::template::{PostProcessStep, Template};
use crate::infrastructure::parsing::{
    CompiledField, CompiledSelector, ParseContext, ParsingError, ParsingResult, SelectorResolver,
};
use crate::infrastructure::post_processing;
use crate::infrastructure::validation::ValidationEngine;

/// Everything one page produced
#[derive(Debug, Clone, PartialEq)]
pub struct PageExtraction {
    pub record: ExtractionRecord,
    /// Empty when the record is accepted
    pub violations: Vec<Violation>,
    pub step_failures: Vec<StepFailure>,
    /// Resolved URL of the next page when pagination is enabled
    pub next_page: Option<String>,
}

impl PageExtraction {
    pub fn is_accepted(&self) -> bool {
        self.violations.is_empty()
    }
}

/// A template with all selectors and patterns compiled
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    template: Template,
    fields: Vec<CompiledField>,
    validator: ValidationEngine,
    next_page: Option<CompiledSelector>,
}

impl CompiledTemplate {
    /// Compile `template`; inactive templates and malformed selectors or
    /// patterns are rejected
    pub fn compile(template: &Template) -> ParsingResult<Self> {
        if !template.is_active {
            return Err(ParsingError::invalid_template(
                &template.name,
                "template is not active",
            ));
        }
        if template.fields.is_empty() {
            return Err(ParsingError::invalid_template(
                &template.name,
                "template declares no fields",
            ));
        }

        let fields = template
            .fields
            .values()
            .map(CompiledField::compile)
            .collect::<ParsingResult<Vec<_>>>()?;
        let validator = ValidationEngine::new(&template.validation)?;

        let next_page = if template.pagination.enabled {
            let source = template
                .pagination
                .next_selector
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| {
                    ParsingError::invalid_template(
                        &template.name,
                        "pagination is enabled without a next_selector",
                    )
                })?;
            Some(CompiledSelector::parse("pagination.next_selector", source)?)
        } else {
            None
        };

        debug!(
            "Compiled template '{}' with {} fields",
            template.name,
            fields.len()
        );
        Ok(Self {
            template: template.clone(),
            fields,
            validator,
            next_page,
        })
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn name(&self) -> &str {
        &self.template.name
    }

    pub const fn paginates(&self) -> bool {
        self.next_page.is_some()
    }

    /// Extract one record from `html` fetched at `page_url`
    pub fn extract(&self, html: &str, page_url: &str) -> PageExtraction {
        self.extract_with(html, &ParseContext::new(page_url))
    }

    pub fn extract_with(&self, html: &str, ctx: &ParseContext) -> PageExtraction {
        let document = Html::parse_document(html);
        let mut record = ExtractionRecord::new(&ctx.page_url);

        for field in &self.fields {
            if let Resolution::Found {
                value, provenance, ..
            } = SelectorResolver::resolve(&document, field)
            {
                record.insert(field.name(), value, provenance);
            }
        }

        let hints: Vec<PostProcessStep> = self
            .fields
            .iter()
            .flat_map(|field| {
                field
                    .spec
                    .post_process
                    .iter()
                    .map(|transform| PostProcessStep::new(field.name(), transform.clone()))
            })
            .collect();
        let mut step_failures = post_processing::apply(&mut record, &hints, ctx);
        step_failures.extend(post_processing::apply(
            &mut record,
            &self.template.post_processing,
            ctx,
        ));

        let violations = self.validator.validate(&record).errors;
        if !violations.is_empty() {
            warn!(
                "Record from {} rejected with {} violations",
                ctx.page_url,
                violations.len()
            );
        }

        let next_page = self.next_page.as_ref().and_then(|selector| {
            selector
                .select(&document)
                .filter_map(|element| element.value().attr("href"))
                .find_map(|href| ctx.resolve(href).ok())
        });

        PageExtraction {
            record,
            violations,
            step_failures,
            next_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::extraction::{FieldValue, Provenance};
    use crate::domain::template::{FieldSpec, PaginationConfig, Transform, ValidationRules};

    fn price_template() -> Template {
        Template::new("shop")
            .with_field(FieldSpec::text("price", ".price").with_fallbacks([".cost"]))
            .with_step(PostProcessStep::new("price", Transform::ExtractPrice))
    }

    #[test]
    fn fallback_price_is_extracted_and_normalized() {
        let compiled = CompiledTemplate::compile(&price_template()).unwrap();
        let page = compiled.extract(
            r#"<div><span class="cost">$12.00</span></div>"#,
            "https://shop.test/p/1",
        );

        assert!(page.is_accepted());
        assert_eq!(page.record.get("price"), Some(&FieldValue::Number(12.0)));
        assert_eq!(page.record.provenance["price"], Provenance::Fallback(0));
        assert_eq!(page.record.provenance["price"].index(), 0);
    }

    #[test]
    fn field_hints_run_before_template_steps() {
        let template = Template::new("t")
            .with_field(
                FieldSpec::text("name", "h1").with_transforms(vec![Transform::Trim]),
            )
            .with_step(PostProcessStep::new("name", Transform::Lowercase));
        let compiled = CompiledTemplate::compile(&template).unwrap();
        let page = compiled.extract("<h1> Big   WIDGET </h1>", "https://shop.test");
        assert_eq!(page.record.get("name"), Some(&FieldValue::text("big widget")));
    }

    #[test]
    fn missing_required_field_rejects_record() {
        let template = price_template().with_validation(ValidationRules {
            required: vec!["price".into()],
            ..ValidationRules::default()
        });
        let compiled = CompiledTemplate::compile(&template).unwrap();
        let page = compiled.extract("<p>no price</p>", "https://shop.test");
        assert!(!page.is_accepted());
        assert_eq!(page.violations[0].field, "price");
    }

    #[test]
    fn failed_step_is_reported_and_field_missing() {
        let compiled = CompiledTemplate::compile(&price_template()).unwrap();
        let page = compiled.extract(r#"<b class="price">ask us</b>"#, "https://shop.test");
        assert_eq!(page.step_failures.len(), 1);
        assert!(page.record.get("price").is_none());
    }

    #[test]
    fn next_page_link_is_resolved() {
        let template = price_template().with_pagination(PaginationConfig {
            enabled: true,
            next_selector: Some("a.next".into()),
            max_pages: 5,
        });
        let compiled = CompiledTemplate::compile(&template).unwrap();
        let page = compiled.extract(
            r#"<span class="price">$1</span><a class="next" href="?page=2">next</a>"#,
            "https://shop.test/list",
        );
        assert_eq!(page.next_page.as_deref(), Some("https://shop.test/list?page=2"));
    }

    #[test]
    fn invalid_templates_are_rejected() {
        let mut inactive = price_template();
        inactive.is_active = false;
        assert!(matches!(
            CompiledTemplate::compile(&inactive),
            Err(ParsingError::InvalidTemplate { .. })
        ));

        let broken = Template::new("t").with_field(FieldSpec::text("x", "div[["));
        assert!(matches!(
            CompiledTemplate::compile(&broken),
            Err(ParsingError::InvalidSelector { .. })
        ));

        let no_next = price_template().with_pagination(PaginationConfig {
            enabled: true,
            next_selector: None,
            max_pages: 3,
        });
        assert!(CompiledTemplate::compile(&no_next).is_err());
    }
}
