//! Tree-sitter outline plugins for PHP and JavaScript
//!
//! Both plugins produce a nested outline: classes (and interfaces, traits,
//! namespaces) own their members. Function and method bodies are not
//! descended into.

use anyhow::{anyhow, Context};
use std::cell::RefCell;
use std::path::Path;
use std::thread::LocalKey;
use tree_sitter::{Language, Node, Parser, Tree};

use crate::model::Definition;
use crate::parser::ParserPlugin;

pub const ICON_CLASS: &str = "code-class";
pub const ICON_FUNCTION: &str = "code-function";
pub const ICON_VARIABLE: &str = "code-variable";
pub const ICON_CONTEXT: &str = "code-context";

thread_local! {
    static PHP_PARSER: RefCell<Option<Parser>> = const { RefCell::new(None) };
    static JS_PARSER: RefCell<Option<Parser>> = const { RefCell::new(None) };
}

fn php_language() -> Language {
    tree_sitter_php::LANGUAGE_PHP.into()
}

fn javascript_language() -> Language {
    tree_sitter_javascript::LANGUAGE.into()
}

/// Parse with this thread's parser for the language, creating it on first use.
fn parse_source(
    slot: &'static LocalKey<RefCell<Option<Parser>>>,
    language: fn() -> Language,
    source: &str,
) -> anyhow::Result<Tree> {
    slot.with(|cell| {
        let mut cell = cell.borrow_mut();
        if cell.is_none() {
            let mut parser = Parser::new();
            parser
                .set_language(&language())
                .context("Failed to load grammar")?;
            *cell = Some(parser);
        }
        let parser = cell
            .as_mut()
            .ok_or_else(|| anyhow!("parser not initialised"))?;
        parser
            .parse(source, None)
            .ok_or_else(|| anyhow!("tree-sitter produced no tree"))
    })
}

fn read_source(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn text<'a>(node: &Node, source: &'a [u8]) -> Option<&'a str> {
    node.utf8_text(source).ok().filter(|t| !t.is_empty())
}

fn named_children<'t>(node: &Node<'t>) -> Vec<Node<'t>> {
    (0..node.named_child_count())
        .filter_map(|i| node.named_child(i))
        .collect()
}

/// Definition positioned at the node's `name` field
fn named_definition(node: &Node, source: &[u8], line_offset: u32, icon: &str) -> Option<Definition> {
    let name = node.child_by_field_name("name")?;
    let start = name.start_position();
    Some(
        Definition::new(
            text(&name, source)?,
            (start.row as u32).saturating_sub(line_offset),
            start.column as u32,
        )
        .with_icon(icon),
    )
}

// ─── PHP ────────────────────────────────────────────────────────────

/// Outline of PHP files: namespaces, classes, interfaces, traits, enums,
/// functions, methods, properties and constants.
pub struct PhpOutline;

impl ParserPlugin for PhpOutline {
    fn name(&self) -> &str {
        "php-outline"
    }

    fn mimetypes(&self) -> &[&str] {
        &["text/x-php", "application/x-php", "application/x-httpd-php"]
    }

    fn parse(&self, path: &Path) -> anyhow::Result<Vec<Definition>> {
        php_outline(&read_source(path)?)
    }
}

/// Outline a PHP source string.
pub fn php_outline(source: &str) -> anyhow::Result<Vec<Definition>> {
    // tree-sitter-php only parses code after an open tag
    let (source, line_offset) = if source.trim_start().starts_with("<?") {
        (source.to_string(), 0)
    } else {
        (format!("<?php\n{}", source), 1)
    };
    let tree = parse_source(&PHP_PARSER, php_language, &source)?;
    let walker = PhpWalker {
        source: source.as_bytes(),
        line_offset,
    };
    Ok(walker.container(&tree.root_node()))
}

struct PhpWalker<'s> {
    source: &'s [u8],
    line_offset: u32,
}

impl PhpWalker<'_> {
    /// Definitions directly inside a program, namespace body or class body
    fn container(&self, node: &Node) -> Vec<Definition> {
        let mut defs = Vec::new();
        for child in named_children(node) {
            match child.kind() {
                "namespace_definition" => {
                    let Some(name) = child.child_by_field_name("name") else {
                        continue;
                    };
                    let Some(label) = text(&name, self.source) else {
                        continue;
                    };
                    let start = name.start_position();
                    let body = child
                        .child_by_field_name("body")
                        .map(|b| self.container(&b))
                        .unwrap_or_default();
                    defs.push(
                        Definition::new(
                            label,
                            (start.row as u32).saturating_sub(self.line_offset),
                            start.column as u32,
                        )
                        .with_icon(ICON_CONTEXT)
                        .with_children(body),
                    );
                }
                "class_declaration" | "interface_declaration" | "trait_declaration"
                | "enum_declaration" => {
                    if let Some(def) = named_definition(&child, self.source, self.line_offset, ICON_CLASS) {
                        let members = child
                            .child_by_field_name("body")
                            .map(|b| self.container(&b))
                            .unwrap_or_default();
                        defs.push(def.with_children(members));
                    }
                }
                "function_definition" | "method_declaration" => {
                    defs.extend(named_definition(&child, self.source, self.line_offset, ICON_FUNCTION));
                }
                "property_declaration" => {
                    defs.extend(self.elements(&child, "property_element", "variable_name", ICON_VARIABLE));
                }
                "const_declaration" => {
                    defs.extend(self.elements(&child, "const_element", "name", ICON_VARIABLE));
                }
                "enum_case" => {
                    defs.extend(named_definition(&child, self.source, self.line_offset, ICON_VARIABLE));
                }
                // Braced namespace bodies and enum bodies
                "compound_statement" | "declaration_list" | "enum_declaration_list" => {
                    defs.extend(self.container(&child));
                }
                _ => {}
            }
        }
        defs
    }

    /// One definition per `element` child, named by its first `name_kind` descendant
    fn elements(&self, node: &Node, element: &str, name_kind: &str, icon: &str) -> Vec<Definition> {
        named_children(node)
            .into_iter()
            .filter(|c| c.kind() == element)
            .filter_map(|el| {
                let name = named_children(&el).into_iter().find(|c| c.kind() == name_kind)?;
                let start = name.start_position();
                Some(
                    Definition::new(
                        text(&name, self.source)?,
                        (start.row as u32).saturating_sub(self.line_offset),
                        start.column as u32,
                    )
                    .with_icon(icon),
                )
            })
            .collect()
    }
}

// ─── JavaScript ─────────────────────────────────────────────────────

/// Outline of JavaScript files: classes with their methods and fields,
/// functions, and top-level bindings.
pub struct JsOutline;

impl ParserPlugin for JsOutline {
    fn name(&self) -> &str {
        "js-outline"
    }

    fn mimetypes(&self) -> &[&str] {
        &["text/javascript", "application/javascript", "application/x-javascript"]
    }

    fn parse(&self, path: &Path) -> anyhow::Result<Vec<Definition>> {
        js_outline(&read_source(path)?)
    }
}

/// Outline a JavaScript source string.
pub fn js_outline(source: &str) -> anyhow::Result<Vec<Definition>> {
    let tree = parse_source(&JS_PARSER, javascript_language, source)?;
    Ok(js_statements(&tree.root_node(), source.as_bytes()))
}

fn js_statements(node: &Node, source: &[u8]) -> Vec<Definition> {
    let mut defs = Vec::new();
    for child in named_children(node) {
        match child.kind() {
            "class_declaration" => {
                if let Some(def) = named_definition(&child, source, 0, ICON_CLASS) {
                    let members = child
                        .child_by_field_name("body")
                        .map(|b| js_class_body(&b, source))
                        .unwrap_or_default();
                    defs.push(def.with_children(members));
                }
            }
            "function_declaration" | "generator_function_declaration" => {
                defs.extend(named_definition(&child, source, 0, ICON_FUNCTION));
            }
            "lexical_declaration" | "variable_declaration" => {
                defs.extend(js_declarators(&child, source));
            }
            "export_statement" => {
                defs.extend(js_statements(&child, source));
            }
            _ => {}
        }
    }
    defs
}

fn js_class_body(body: &Node, source: &[u8]) -> Vec<Definition> {
    named_children(body)
        .into_iter()
        .filter_map(|member| match member.kind() {
            "method_definition" => named_definition(&member, source, 0, ICON_FUNCTION),
            "field_definition" => {
                let property = member.child_by_field_name("property")?;
                let start = property.start_position();
                Some(
                    Definition::new(text(&property, source)?, start.row as u32, start.column as u32)
                        .with_icon(ICON_VARIABLE),
                )
            }
            _ => None,
        })
        .collect()
}

/// `const a = ..., b = ...` at statement level. Bindings to functions and
/// classes get the matching icon.
fn js_declarators(node: &Node, source: &[u8]) -> Vec<Definition> {
    named_children(node)
        .into_iter()
        .filter(|c| c.kind() == "variable_declarator")
        .filter_map(|decl| {
            let name = decl.child_by_field_name("name")?;
            if name.kind() != "identifier" {
                return None;
            }
            let icon = match decl.child_by_field_name("value").map(|v| v.kind()) {
                Some("arrow_function" | "function_expression" | "generator_function") => ICON_FUNCTION,
                Some("class") => ICON_CLASS,
                _ => ICON_VARIABLE,
            };
            let start = name.start_position();
            Some(
                Definition::new(text(&name, source)?, start.row as u32, start.column as u32)
                    .with_icon(icon),
            )
        })
        .collect()
}
