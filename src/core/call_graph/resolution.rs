// src/core/call_graph/resolution.rs - classify a call site against the project
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::rc::Rc;

use tracing::{debug, warn};

use super::model::{Diagnostic, ResolutionStatus};
use crate::core::languages::{
    CallSite, CallerContext, Definition, DefinitionKind, ImportBinding, ImportTarget, LanguageExtractor,
};
use crate::core::parser::{ParsedUnit, Session};
use crate::core::symbol_id::relative_path;

/// A project definition a call resolved to
#[derive(Clone)]
pub struct ResolvedTarget {
    pub unit: Rc<ParsedUnit>,
    pub definition: Definition,
}

pub enum Resolution {
    Project(ResolvedTarget),
    External {
        status: ResolutionStatus,
        module_hint: Option<String>,
    },
    Unresolved,
}

impl Resolution {
    fn external(status: ResolutionStatus, module_hint: Option<&str>) -> Self {
        Resolution::External {
            status,
            module_hint: module_hint.map(str::to_string),
        }
    }

    fn from_import(binding: &ImportBinding) -> Self {
        let status = match binding.target {
            ImportTarget::Stdlib => ResolutionStatus::IgnoredStdlib,
            _ => ResolutionStatus::IgnoredThirdParty,
        };
        Resolution::external(status, Some(&binding.module))
    }

    pub fn status(&self) -> ResolutionStatus {
        match self {
            Resolution::Project(_) => ResolutionStatus::ResolvedProject,
            Resolution::External { status, .. } => *status,
            Resolution::Unresolved => ResolutionStatus::Unresolved,
        }
    }
}

/// Resolves the calls made from one function body
pub struct Resolver<'c> {
    caller: &'c CallerContext,
    extractor: &'static dyn LanguageExtractor,
}

impl<'c> Resolver<'c> {
    pub fn new(caller: &'c CallerContext) -> Self {
        Self {
            caller,
            extractor: caller.unit.language.extractor(),
        }
    }

    /// Classify `call`, following imports into other project files on demand.
    ///
    /// The order of checks matters: local definitions shadow builtins only
    /// when they exist, and receiver typing is the last resort.
    pub fn resolve(&self, call: &CallSite, session: &mut Session, diagnostics: &mut Vec<Diagnostic>) -> Resolution {
        let unit = &self.caller.unit;
        let rules = self.extractor.rules();
        let name = call.name.as_str();

        let Some(receiver) = call.receiver.as_deref() else {
            return self.resolve_unqualified(call, session, diagnostics);
        };
        let root = call.receiver_root().unwrap_or(receiver);

        // Well-known namespaces, unless the project shadows them
        let shadowed = unit.imports.lookup(root).is_some() || unit.find_class(root).is_some() || unit.has_namespace(root);
        if !shadowed && !rules.self_receivers.contains(&root) {
            if let Some(status) = self.extractor.classify_namespace(root) {
                return Resolution::external(status, Some(root));
            }
        }

        if rules.self_receivers.contains(&receiver) {
            let Some(class_name) = self.caller.definition.class_name.as_deref() else {
                return Resolution::Unresolved;
            };
            return match self.method_in_hierarchy(unit, class_name, name, false, session, diagnostics) {
                Some(target) => Resolution::Project(target),
                None => Resolution::Unresolved,
            };
        }

        if matches!(receiver, "super()" | "super") {
            return self.resolve_super(name, session, diagnostics);
        }

        let qualifier = receiver.rsplit(|c| c == '.' || c == ':').next().unwrap_or(receiver);

        // Class or namespace defined in this file
        if unit.find_class(qualifier).is_some() && qualifier == receiver.trim_start_matches(':') {
            if let Some(target) = self.class_member(unit, qualifier, call, session, diagnostics) {
                return Resolution::Project(target);
            }
        }
        if let Some(target) = namespace_function(unit, receiver, name) {
            return Resolution::Project(target);
        }

        if let Some(binding) = unit.imports.lookup(root) {
            return self.resolve_through_import(binding, call, receiver, root, session, diagnostics);
        }

        // Classes and namespaces visible through wildcard imports / includes
        for included in self.wildcard_units(unit, session, diagnostics) {
            if included.find_class(qualifier).is_some() {
                if let Some(target) = self.class_member(&included, qualifier, call, session, diagnostics) {
                    return Resolution::Project(target);
                }
            }
            if let Some(target) = namespace_function(&included, receiver, name) {
                return Resolution::Project(target);
            }
        }

        self.resolve_by_receiver_type(call, receiver, session, diagnostics)
    }

    fn resolve_unqualified(&self, call: &CallSite, session: &mut Session, diagnostics: &mut Vec<Diagnostic>) -> Resolution {
        let unit = &self.caller.unit;
        let name = call.name.as_str();
        let defined_locally = unit.find_function(name).is_some() || unit.find_class(name).is_some();
        let imported = unit.imports.lookup(name).is_some();

        if !defined_locally && !imported {
            if self.extractor.is_builtin(name) {
                return Resolution::external(ResolutionStatus::IgnoredBuiltin, None);
            }
            if self.extractor.is_stdlib_function(name) {
                return Resolution::external(ResolutionStatus::IgnoredStdlib, None);
            }
        }

        if let Some(target) = self.callable_in_unit(unit, name) {
            return Resolution::Project(target);
        }

        if self.extractor.implicit_self_calls() {
            if let Some(class_name) = self.caller.definition.class_name.as_deref() {
                if let Some(target) = self.method_in_hierarchy(unit, class_name, name, false, session, diagnostics) {
                    return Resolution::Project(target);
                }
            }
        }

        if let Some(binding) = unit.imports.lookup(name) {
            return match &binding.target {
                ImportTarget::Project(path) => {
                    let Some(imported_unit) = self.load(path, session, diagnostics) else {
                        return Resolution::Unresolved;
                    };
                    let member = binding.imported_name.as_deref().unwrap_or(name);
                    match self.callable_in_unit(&imported_unit, member) {
                        Some(target) => Resolution::Project(target),
                        None => Resolution::Unresolved,
                    }
                }
                _ => Resolution::from_import(binding),
            };
        }

        for included in self.wildcard_units(unit, session, diagnostics) {
            if let Some(target) = self.callable_in_unit(&included, name) {
                return Resolution::Project(target);
            }
        }
        Resolution::Unresolved
    }

    fn resolve_through_import(
        &self,
        binding: &ImportBinding,
        call: &CallSite,
        receiver: &str,
        root: &str,
        session: &mut Session,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Resolution {
        let ImportTarget::Project(path) = &binding.target else {
            return Resolution::from_import(binding);
        };
        let Some(imported_unit) = self.load(path, session, diagnostics) else {
            return Resolution::Unresolved;
        };

        let rest: Vec<&str> = receiver[root.len()..]
            .split(|c| c == '.' || c == ':')
            .filter(|s| !s.is_empty())
            .collect();

        let class_name = match (binding.imported_name.as_deref(), rest.as_slice()) {
            // module.func()
            (None, []) => {
                return match self.callable_in_unit(&imported_unit, &call.name) {
                    Some(target) => Resolution::Project(target),
                    None => Resolution::Unresolved,
                };
            }
            // module.Class.method()
            (None, [class_name]) => *class_name,
            // ImportedClass.method()
            (Some(imported), []) => imported,
            _ => return Resolution::Unresolved,
        };

        match self.class_member(&imported_unit, class_name, call, session, diagnostics) {
            Some(target) => Resolution::Project(target),
            None => Resolution::Unresolved,
        }
    }

    fn resolve_super(&self, name: &str, session: &mut Session, diagnostics: &mut Vec<Diagnostic>) -> Resolution {
        let unit = &self.caller.unit;
        let Some(class_name) = self.caller.definition.class_name.as_deref() else {
            return Resolution::Unresolved;
        };
        match self.method_in_hierarchy(unit, class_name, name, true, session, diagnostics) {
            Some(target) => Resolution::Project(target),
            None => Resolution::Unresolved,
        }
    }

    fn resolve_by_receiver_type(
        &self,
        call: &CallSite,
        receiver: &str,
        session: &mut Session,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Resolution {
        let unit = &self.caller.unit;
        let name = call.name.as_str();

        if let Some(type_name) = self.extractor.infer_receiver_type(receiver, self.caller, session) {
            debug!("Receiver {} of {} typed as {}", receiver, call.expression, type_name);
            if let Some((class_unit, class_name)) = self.locate_class(unit, &type_name, session, diagnostics) {
                return match self.method_in_hierarchy(&class_unit, &class_name, name, false, session, diagnostics) {
                    Some(target) => Resolution::Project(target),
                    None => Resolution::Unresolved,
                };
            }
            if let Some(binding) = unit.imports.lookup(&type_name) {
                if !matches!(binding.target, ImportTarget::Project(_)) {
                    return Resolution::from_import(binding);
                }
            }
            let primitive = type_name.chars().next().map_or(false, |c| c.is_ascii_lowercase());
            if primitive || self.extractor.is_builtin(&type_name) {
                return Resolution::external(ResolutionStatus::IgnoredBuiltin, None);
            }
        }

        if self.extractor.is_builtin_method(name) {
            return Resolution::external(ResolutionStatus::IgnoredBuiltin, None);
        }
        if unit.classes_with_method(name).len() > 1 {
            return Resolution::external(ResolutionStatus::Ambiguous, None);
        }
        Resolution::Unresolved
    }

    /// Function or class named `name` in `unit`; classes resolve to their
    /// initializer when they declare one
    fn callable_in_unit(&self, unit: &Rc<ParsedUnit>, name: &str) -> Option<ResolvedTarget> {
        if let Some(function) = unit.find_function(name) {
            return Some(target(unit, function));
        }
        let class = unit.find_class(name)?;
        let constructor = self.extractor.constructor_name(name);
        let definition = unit.find_method(name, &constructor).unwrap_or(class);
        Some(target(unit, definition))
    }

    /// `Class.method()` / `Class::method()` / `new ns::Class()`
    fn class_member(
        &self,
        unit: &Rc<ParsedUnit>,
        class_name: &str,
        call: &CallSite,
        session: &mut Session,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<ResolvedTarget> {
        let nested_class = call.name.chars().next().map_or(false, |c| c.is_ascii_uppercase()) && unit.find_class(&call.name).is_some();
        if class_name == call.name || nested_class {
            return self.callable_in_unit(unit, &call.name);
        }
        self.method_in_hierarchy(unit, class_name, &call.name, false, session, diagnostics)
    }

    /// Find `method` on `class_name` or, failing that, on its project base
    /// classes (breadth first). With `skip_own` the class itself is skipped.
    fn method_in_hierarchy(
        &self,
        unit: &Rc<ParsedUnit>,
        class_name: &str,
        method: &str,
        skip_own: bool,
        session: &mut Session,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<ResolvedTarget> {
        let mut queue = VecDeque::from([(Rc::clone(unit), class_name.to_string(), skip_own)]);
        let mut visited = HashSet::new();

        while let Some((class_unit, class, skip)) = queue.pop_front() {
            if !visited.insert((class_unit.relative_path.clone(), class.clone())) {
                continue;
            }

            if !skip {
                // Out-of-line methods may live next to the header or in the caller's includes
                let mut search = vec![Rc::clone(&class_unit)];
                search.extend(self.wildcard_units(&class_unit, session, diagnostics));
                search.push(Rc::clone(&self.caller.unit));
                search.extend(self.wildcard_units(&self.caller.unit, session, diagnostics));
                for candidate in &search {
                    if let Some(found) = candidate.find_method(&class, method) {
                        return Some(target(candidate, found));
                    }
                }
            }

            let bases = class_unit
                .find_class(&class)
                .map(|c| c.bases.clone())
                .unwrap_or_default();
            for base in bases {
                if let Some(located) = self.locate_class(&class_unit, &base, session, diagnostics) {
                    queue.push_back((located.0, located.1, false));
                }
            }
        }
        None
    }

    /// Locate the unit declaring class `name` as seen from `unit`
    fn locate_class(
        &self,
        unit: &Rc<ParsedUnit>,
        name: &str,
        session: &mut Session,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<(Rc<ParsedUnit>, String)> {
        if unit.find_class(name).is_some() {
            return Some((Rc::clone(unit), name.to_string()));
        }

        if let Some(binding) = unit.imports.lookup(name) {
            if let ImportTarget::Project(path) = &binding.target {
                let imported = self.load(path, session, diagnostics)?;
                let class_name = binding.imported_name.clone().unwrap_or_else(|| name.to_string());
                if imported.find_class(&class_name).is_some() {
                    return Some((imported, class_name));
                }
            }
            return None;
        }

        self.wildcard_units(unit, session, diagnostics)
            .into_iter()
            .find(|included| included.find_class(name).is_some())
            .map(|included| (included, name.to_string()))
    }

    fn wildcard_units(&self, unit: &ParsedUnit, session: &mut Session, diagnostics: &mut Vec<Diagnostic>) -> Vec<Rc<ParsedUnit>> {
        unit.imports
            .wildcards
            .iter()
            .filter_map(|w| match &w.target {
                ImportTarget::Project(path) => Some(path.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .into_iter()
            .filter_map(|path| self.load(&path, session, diagnostics))
            .collect()
    }

    fn load(&self, path: &Path, session: &mut Session, diagnostics: &mut Vec<Diagnostic>) -> Option<Rc<ParsedUnit>> {
        match session.load(path) {
            Ok(unit) => Some(unit),
            Err(e) => {
                warn!("Cross-file resolution from {} failed: {}", self.caller.unit.relative_path, e);
                let diagnostic = Diagnostic::CrossFileReadFailure {
                    path: relative_path(path, &session.project_root),
                    message: e.to_string(),
                };
                if !diagnostics.contains(&diagnostic) {
                    diagnostics.push(diagnostic);
                }
                None
            }
        }
    }
}

fn target(unit: &Rc<ParsedUnit>, definition: &Definition) -> ResolvedTarget {
    ResolvedTarget {
        unit: Rc::clone(unit),
        definition: definition.clone(),
    }
}

/// `ns::func()` where the file declares `func` inside namespace `ns`
fn namespace_function(unit: &Rc<ParsedUnit>, namespace: &str, name: &str) -> Option<ResolvedTarget> {
    let namespace = namespace.trim_start_matches("::");
    unit.definitions
        .iter()
        .find(|d| {
            d.kind == DefinitionKind::Function
                && d.name == name
                && d.namespace.as_deref().map_or(false, |ns| ns == namespace || ns.ends_with(&format!("::{}", namespace)))
        })
        .map(|d| target(unit, d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::call_graph::CallType;
    use crate::core::parser::ParserRegistry;
    use assert_fs::prelude::*;

    fn caller(unit: &Rc<ParsedUnit>, class_name: Option<&str>, name: &str, root: &Path) -> CallerContext {
        let definition = match class_name {
            Some(class_name) => unit.find_method(class_name, name),
            None => unit.find_function(name),
        }
        .unwrap()
        .clone();
        CallerContext {
            node_id: unit.symbol_id(&definition, root),
            unit: Rc::clone(unit),
            definition,
        }
    }

    fn call(name: &str, receiver: Option<&str>, call_type: CallType) -> CallSite {
        let expression = match receiver {
            Some(r) => format!("{}.{}", r, name),
            None => name.to_string(),
        };
        CallSite {
            name: name.to_string(),
            receiver: receiver.map(str::to_string),
            call_type,
            expression,
            arguments: None,
            line: 1,
            column: 0,
        }
    }

    #[test]
    fn test_python_resolution_order() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("models.py")
            .write_str("class User:\n    def __init__(self):\n        pass\n\n    def save(self):\n        pass\n")
            .unwrap();
        temp.child("app.py")
            .write_str(
                r#"import os
import requests
from models import User
from .broken import thing

class Base:
    def audit(self):
        pass

class A(Base):
    def run(self):
        pass

    def go(self, user: User, items):
        pass

class B:
    def run(self):
        pass

def helper():
    pass
"#,
            )
            .unwrap();

        let registry = ParserRegistry::with_all_languages();
        let mut session = Session::new(&registry, temp.path(), 1 << 20);
        let unit = session.load(temp.child("app.py").path()).unwrap();
        let ctx = caller(&unit, Some("A"), "go", temp.path());
        let resolver = Resolver::new(&ctx);
        let mut diagnostics = Vec::new();

        let mut status = |c: CallSite| resolver.resolve(&c, &mut session, &mut diagnostics).status();

        assert_eq!(status(call("print", None, CallType::Direct)), ResolutionStatus::IgnoredBuiltin);
        assert_eq!(status(call("join", Some("os.path"), CallType::Method)), ResolutionStatus::IgnoredStdlib);
        assert_eq!(status(call("get", Some("requests"), CallType::Method)), ResolutionStatus::IgnoredThirdParty);
        assert_eq!(status(call("run", Some("self"), CallType::Method)), ResolutionStatus::ResolvedProject);
        assert_eq!(status(call("audit", Some("self"), CallType::Method)), ResolutionStatus::ResolvedProject);
        assert_eq!(status(call("missing", Some("self"), CallType::Method)), ResolutionStatus::Unresolved);
        assert_eq!(status(call("helper", None, CallType::Direct)), ResolutionStatus::ResolvedProject);
        assert_eq!(status(call("User", None, CallType::Constructor)), ResolutionStatus::ResolvedProject);
        assert_eq!(status(call("save", Some("user"), CallType::Method)), ResolutionStatus::ResolvedProject);
        assert_eq!(status(call("append", Some("items"), CallType::Method)), ResolutionStatus::IgnoredBuiltin);
        assert_eq!(status(call("run", Some("thing_holder"), CallType::Method)), ResolutionStatus::Ambiguous);
        assert_eq!(status(call("nowhere", None, CallType::Direct)), ResolutionStatus::Unresolved);
        assert_eq!(status(call("thing", None, CallType::Direct)), ResolutionStatus::Unresolved);

        assert!(diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::CrossFileReadFailure { path, .. } if path.contains("broken"))));
    }

    #[test]
    fn test_constructor_resolves_to_initializer() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("m.py")
            .write_str("class WithInit:\n    def __init__(self):\n        pass\n\nclass Plain:\n    pass\n\ndef main():\n    pass\n")
            .unwrap();

        let registry = ParserRegistry::with_all_languages();
        let mut session = Session::new(&registry, temp.path(), 1 << 20);
        let unit = session.load(temp.child("m.py").path()).unwrap();
        let ctx = caller(&unit, None, "main", temp.path());
        let resolver = Resolver::new(&ctx);
        let mut diagnostics = Vec::new();

        let Resolution::Project(with_init) = resolver.resolve(&call("WithInit", None, CallType::Constructor), &mut session, &mut diagnostics) else {
            panic!("expected project resolution");
        };
        assert_eq!(with_init.definition.name, "__init__");

        let Resolution::Project(plain) = resolver.resolve(&call("Plain", None, CallType::Constructor), &mut session, &mut diagnostics) else {
            panic!("expected project resolution");
        };
        assert_eq!(plain.definition.kind, DefinitionKind::Class);
    }

    #[test]
    fn test_cpp_header_and_namespace_resolution() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("repo.h")
            .write_str("namespace util { int clamp(int v); }\nclass Repo {\npublic:\n  void save();\n  static Repo* instance();\n};\n")
            .unwrap();
        temp.child("repo.cpp")
            .write_str("#include \"repo.h\"\nvoid Repo::save() {}\nRepo* Repo::instance() { return nullptr; }\nnamespace util { int clamp(int v) { return v; } }\n")
            .unwrap();
        temp.child("main.cpp")
            .write_str(
                "#include \"repo.h\"\n#include <vector>\n\nclass App {\npublic:\n  void helper() {}\n  void run(Repo& repo) {\n    repo.save();\n  }\n};\n",
            )
            .unwrap();

        let registry = ParserRegistry::with_all_languages();
        let mut session = Session::new(&registry, temp.path(), 1 << 20);
        let unit = session.load(temp.child("main.cpp").path()).unwrap();
        let ctx = caller(&unit, Some("App"), "run", temp.path());
        let resolver = Resolver::new(&ctx);
        let mut diagnostics = Vec::new();
        let mut resolve = |c: CallSite| resolver.resolve(&c, &mut session, &mut diagnostics);

        let Resolution::Project(save) = resolve(call("save", Some("repo"), CallType::Method)) else {
            panic!("typed receiver should resolve through the header's source file");
        };
        assert!(save.unit.relative_path.ends_with("repo.cpp"));

        assert_eq!(resolve(call("instance", Some("Repo"), CallType::Static)).status(), ResolutionStatus::ResolvedProject);
        assert_eq!(resolve(call("clamp", Some("util"), CallType::Static)).status(), ResolutionStatus::ResolvedProject);
        assert_eq!(resolve(call("helper", None, CallType::Direct)).status(), ResolutionStatus::ResolvedProject);
        assert_eq!(resolve(call("sort", Some("std"), CallType::Static)).status(), ResolutionStatus::IgnoredStdlib);
        assert_eq!(resolve(call("printf", None, CallType::Direct)).status(), ResolutionStatus::IgnoredStdlib);
        assert_eq!(resolve(call("push_back", Some("items"), CallType::Method)).status(), ResolutionStatus::IgnoredBuiltin);
    }
}
