//! `HandleResolver`: maps an inbound local-part to `ProcessingInstructions`.
//!
//! Grounded on `original_source/mxtoai/email_handles.py`'s
//! `DEFAULT_EMAIL_HANDLES` table (the newer of the two near-duplicate tables
//! in the source, per the design note recorded in DESIGN.md) and its
//! `COMMON_TOOLS`/`SEARCH_TOOLS`/`RESEARCH_TOOLS` clusters, now re-exported
//! from `handlemail_tools::registry`.

use std::collections::HashMap;

use handlemail_core::models::ProcessingInstructions;
use handlemail_core::{Error, Result};
use handlemail_tools::registry::{names, COMMON_TOOLS, RESEARCH_TOOLS, SEARCH_TOOLS};

use crate::prompts::handle_copy;

fn tools(clusters: &[&[&str]], extra: &[&str]) -> Vec<String> {
    clusters.iter().flat_map(|c| c.iter()).chain(extra.iter()).map(|s| (*s).to_string()).collect()
}

fn instructions(
    handle: &str,
    process_attachments: bool,
    deep_research_mandatory: bool,
    allowed_tools: Vec<String>,
    task_template: &str,
    output_template: &str,
    requires_schedule_extraction: bool,
    add_summary: bool,
    uses_agent_loop: bool,
) -> ProcessingInstructions {
    ProcessingInstructions {
        handle: handle.to_string(),
        process_attachments,
        deep_research_mandatory,
        allowed_tools,
        task_template: task_template.to_string(),
        output_template: output_template.to_string(),
        target_model_group: "default".to_string(),
        requires_language_detection: false,
        requires_schedule_extraction,
        rejection_message: None,
        specific_research_instructions: None,
        add_summary,
        uses_agent_loop,
    }
}

/// One entry in the default table: canonical handle name, its aliases, and
/// the `ProcessingInstructions` every alias resolves to.
struct HandleEntry {
    handle: &'static str,
    aliases: &'static [&'static str],
    instructions: fn() -> ProcessingInstructions,
}

const DEFAULT_EMAIL_HANDLES: &[HandleEntry] = &[
    HandleEntry {
        handle: "summarize",
        aliases: &["summarise", "summary"],
        instructions: || {
            instructions(
                "summarize",
                true,
                false,
                tools(&[COMMON_TOOLS, SEARCH_TOOLS], &[]),
                handle_copy::SUMMARIZE_TASK,
                handle_copy::SUMMARIZE_OUTPUT,
                false,
                false,
                true,
            )
        },
    },
    HandleEntry {
        handle: "research",
        aliases: &["deep-research"],
        instructions: || {
            instructions(
                "research",
                true,
                true,
                tools(&[COMMON_TOOLS, SEARCH_TOOLS, RESEARCH_TOOLS], &[]),
                handle_copy::RESEARCH_TASK,
                handle_copy::RESEARCH_OUTPUT,
                false,
                true,
                false,
            )
        },
    },
    HandleEntry {
        handle: "simplify",
        aliases: &["eli5", "explain"],
        instructions: || {
            instructions(
                "simplify",
                true,
                false,
                tools(&[COMMON_TOOLS, SEARCH_TOOLS], &[]),
                handle_copy::SIMPLIFY_TASK,
                handle_copy::SIMPLIFY_OUTPUT,
                false,
                false,
                true,
            )
        },
    },
    HandleEntry {
        handle: "ask",
        aliases: &["custom", "agent", "assist", "assistant", "hi", "hello", "question"],
        instructions: || {
            instructions(
                "ask",
                true,
                false,
                tools(&[COMMON_TOOLS, SEARCH_TOOLS, RESEARCH_TOOLS], &[names::MEETING_CREATOR, names::SCHEDULED_TASKS]),
                handle_copy::ASK_TASK,
                handle_copy::ASK_OUTPUT,
                false,
                false,
                true,
            )
        },
    },
    HandleEntry {
        handle: "fact-check",
        aliases: &["factcheck", "verify"],
        instructions: || {
            instructions(
                "fact-check",
                true,
                false,
                tools(&[COMMON_TOOLS, SEARCH_TOOLS, RESEARCH_TOOLS], &[]),
                handle_copy::FACT_CHECK_TASK,
                handle_copy::FACT_CHECK_OUTPUT,
                false,
                false,
                true,
            )
        },
    },
    HandleEntry {
        handle: "background-research",
        aliases: &["background-check", "background"],
        instructions: || {
            instructions(
                "background-research",
                true,
                false,
                tools(&[COMMON_TOOLS, SEARCH_TOOLS, RESEARCH_TOOLS], &[]),
                handle_copy::BACKGROUND_RESEARCH_TASK,
                handle_copy::BACKGROUND_RESEARCH_OUTPUT,
                false,
                false,
                true,
            )
        },
    },
    HandleEntry {
        handle: "translate",
        aliases: &["translation"],
        instructions: || {
            let mut i = instructions(
                "translate",
                true,
                false,
                tools(&[COMMON_TOOLS, SEARCH_TOOLS], &[]),
                handle_copy::TRANSLATE_TASK,
                handle_copy::TRANSLATE_OUTPUT,
                false,
                false,
                true,
            );
            i.requires_language_detection = true;
            i
        },
    },
    HandleEntry {
        handle: "meeting",
        aliases: &["meet", "find-time", "calendar"],
        instructions: || {
            instructions(
                "meeting",
                true,
                false,
                tools(&[COMMON_TOOLS], &[names::MEETING_CREATOR]),
                handle_copy::MEETING_TASK,
                handle_copy::MEETING_OUTPUT,
                true,
                false,
                true,
            )
        },
    },
    HandleEntry {
        handle: "pdf",
        aliases: &["export", "convert", "document", "export-pdf"],
        instructions: || {
            instructions(
                "pdf",
                true,
                false,
                tools(&[COMMON_TOOLS], &[]),
                handle_copy::PDF_TASK,
                handle_copy::PDF_OUTPUT,
                false,
                false,
                true,
            )
        },
    },
    HandleEntry {
        handle: "schedule",
        aliases: &["remind", "recurring", "schedule-task", "schedule-reminder", "future-task", "recurring-task", "delayed-processing"],
        instructions: || {
            instructions(
                "schedule",
                true,
                false,
                tools(&[COMMON_TOOLS], &[names::SCHEDULED_TASKS]),
                handle_copy::SCHEDULE_TASK,
                handle_copy::SCHEDULE_OUTPUT,
                false,
                false,
                true,
            )
        },
    },
    HandleEntry {
        handle: "delete",
        aliases: &["cancel", "cancel-task", "delete-task", "remove-task", "unschedule", "stop-task"],
        instructions: || {
            instructions(
                "delete",
                false,
                false,
                vec![names::DELETE_SCHEDULED_TASKS.to_string(), names::PYTHON_INTERPRETER.to_string(), names::REFERENCES_GENERATOR.to_string()],
                handle_copy::DELETE_TASK,
                handle_copy::DELETE_OUTPUT,
                false,
                false,
                true,
            )
        },
    },
];

/// Lower-cases and strips everything from the first `+` onward, the
/// normalization `HandleResolver::resolve` applies before lookup (spec
/// §4.4).
#[must_use]
pub fn normalize_local_part(local_part: &str) -> String {
    let lower = local_part.to_ascii_lowercase();
    match lower.find('+') {
        Some(idx) => lower[..idx].to_string(),
        None => lower,
    }
}

/// Read-mostly name -> `ProcessingInstructions` map, built once at startup
/// and shared across workers.
#[derive(Clone, Default)]
pub struct HandleResolver {
    by_name: HashMap<String, ProcessingInstructions>,
}

impl HandleResolver {
    /// Builds the resolver from the built-in `DEFAULT_EMAIL_HANDLES` table.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut resolver = Self::default();
        for entry in DEFAULT_EMAIL_HANDLES {
            let instructions = (entry.instructions)();
            resolver.by_name.insert(entry.handle.to_string(), instructions.clone());
            for alias in entry.aliases {
                resolver.by_name.insert((*alias).to_string(), instructions.clone());
            }
        }
        resolver
    }

    /// Registers a custom handle (or alias) under `name`. Fails with
    /// `HandleAlreadyExists` unless `overwrite` is set, matching the
    /// source's `add_custom_handle` guard.
    pub fn add_custom_handle(&mut self, name: &str, instructions: ProcessingInstructions, overwrite: bool) -> Result<()> {
        let key = normalize_local_part(name);
        if !overwrite && self.by_name.contains_key(&key) {
            return Err(Error::HandleAlreadyExists(key));
        }
        self.by_name.insert(key, instructions);
        Ok(())
    }

    /// Resolves a raw local-part (e.g. `to_email`'s part before `@`) to its
    /// `ProcessingInstructions`, after normalization.
    #[must_use]
    pub fn resolve(&self, local_part: &str) -> Option<&ProcessingInstructions> {
        self.by_name.get(&normalize_local_part(local_part))
    }

    /// Canonical handle names (not aliases), for the unsupported-handle
    /// rejection copy's "known handles" listing.
    #[must_use]
    pub fn canonical_handles() -> Vec<&'static str> {
        DEFAULT_EMAIL_HANDLES.iter().map(|e| e.handle).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_and_strips_plus_suffix() {
        assert_eq!(normalize_local_part("Ask+tag123"), "ask");
        assert_eq!(normalize_local_part("SUMMARIZE"), "summarize");
    }

    #[test]
    fn resolves_canonical_handles_and_aliases() {
        let resolver = HandleResolver::with_defaults();
        assert_eq!(resolver.resolve("research").unwrap().handle, "research");
        assert_eq!(resolver.resolve("deep-research").unwrap().handle, "research");
        assert_eq!(resolver.resolve("Summary+x").unwrap().handle, "summarize");
    }

    #[test]
    fn unknown_handle_resolves_to_none() {
        let resolver = HandleResolver::with_defaults();
        assert!(resolver.resolve("not-a-handle").is_none());
    }

    #[test]
    fn research_handle_requires_deep_research_and_adds_summary() {
        let resolver = HandleResolver::with_defaults();
        let instructions = resolver.resolve("research").unwrap();
        assert!(instructions.deep_research_mandatory);
        assert!(instructions.add_summary);
        assert!(instructions.allowed_tools.contains(&names::DEEP_RESEARCH.to_string()));
    }

    #[test]
    fn delete_handle_disables_attachment_processing_and_limits_tools() {
        let resolver = HandleResolver::with_defaults();
        let instructions = resolver.resolve("cancel-task").unwrap();
        assert_eq!(instructions.handle, "delete");
        assert!(!instructions.process_attachments);
        assert_eq!(instructions.allowed_tools.len(), 3);
        assert!(instructions.allowed_tools.contains(&names::DELETE_SCHEDULED_TASKS.to_string()));
    }

    #[test]
    fn schedule_and_ask_handles_expose_scheduler_tools() {
        let resolver = HandleResolver::with_defaults();
        assert!(resolver.resolve("schedule").unwrap().allowed_tools.contains(&names::SCHEDULED_TASKS.to_string()));
        assert!(resolver.resolve("ask").unwrap().allowed_tools.contains(&names::SCHEDULED_TASKS.to_string()));
    }

    #[test]
    fn add_custom_handle_refuses_duplicate_without_overwrite() {
        let mut resolver = HandleResolver::with_defaults();
        let instructions = resolver.resolve("ask").unwrap().clone();
        let err = resolver.add_custom_handle("ask", instructions.clone(), false).unwrap_err();
        assert!(matches!(err, Error::HandleAlreadyExists(_)));
        assert!(resolver.add_custom_handle("ask", instructions, true).is_ok());
    }

    #[test]
    fn add_custom_handle_registers_a_brand_new_name() {
        let mut resolver = HandleResolver::with_defaults();
        let instructions = resolver.resolve("summarize").unwrap().clone();
        resolver.add_custom_handle("digest", instructions, false).unwrap();
        assert_eq!(resolver.resolve("Digest").unwrap().handle, "summarize");
    }
}
