use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, info, trace};

use crate::{
    cst::{best_by, Span, TemplateSet},
    errors::{CompileError, CompileResult, ErrorKind, InstantiationFrame},
    types::{serialize_list, Bindings, Type},
};

use super::{
    instance::{FnKey, InstantiatedClass, Program},
    resolve::{self, BodyResolver},
    scope::Scope,
};

/// Which template a concrete key resolved to, and the bindings that made it match
#[derive(Clone, Debug)]
pub struct TemplateMatch {
    pub template: usize,
    pub bindings: Bindings,
}

/// The demand chain of a job, outermost first; the last frame is the job itself
pub type Chain = Vec<InstantiationFrame>;

/// Innermost first, the order an error shows them in
pub(super) fn frames_of(chain: &[InstantiationFrame]) -> Vec<InstantiationFrame> {
    chain.iter().rev().cloned().collect()
}

#[derive(Debug)]
struct Job<K> {
    key: K,
    chain: Chain,
}

/// The whole-program monomorphizer.
///
/// Owns every piece of state one instantiation run needs: the two work queues,
/// the seen sets that make instantiation happen at most once per key, and the
/// template matching caches. Nothing is shared between two instantiators.
pub struct Instantiator<'t> {
    pub(super) templates: &'t TemplateSet,
    max_depth: usize,

    fn_queue: VecDeque<Job<FnKey>>,
    class_queue: VecDeque<Job<Type>>,

    fn_seen: HashSet<String>,
    class_seen: HashSet<String>,

    fn_matches: HashMap<String, Option<TemplateMatch>>,
    class_matches: HashMap<String, Option<TemplateMatch>>,

    /// The frame of top level declarations, which every function scope starts from
    pub(super) globals: Scope,

    program: Program,
}

impl<'t> Instantiator<'t> {
    pub fn new(templates: &'t TemplateSet, max_depth: usize) -> Instantiator<'t> {
        Instantiator {
            templates,
            max_depth,
            fn_queue: VecDeque::new(),
            class_queue: VecDeque::new(),
            fn_seen: HashSet::new(),
            class_seen: HashSet::new(),
            fn_matches: HashMap::new(),
            class_matches: HashMap::new(),
            globals: Scope::new(),
            program: Program::default(),
        }
    }

    /// Seeds the queues and drains them until everything reachable is instantiated
    pub fn run(mut self) -> CompileResult<Program> {
        self.seed_globals()?;
        self.seed_statics()?;
        self.seed_main()?;
        self.drain()?;

        info!(
            "instantiated {} functions and {} classes",
            self.program.functions.len(),
            self.program.classes.len()
        );

        Ok(self.program)
    }

    fn seed_globals(&mut self) -> CompileResult<()> {
        let templates = self.templates;

        for decl in templates.declarations.iter() {
            let chain = vec![InstantiationFrame {
                site: Some(decl.span),
                description: "while initializing a top level declaration".to_owned(),
                origin: None,
            }];

            let scope = std::mem::take(&mut self.globals);
            let mut r = BodyResolver::for_globals(self, scope, chain.clone());

            let stmt = r
                .resolve_stmt(decl)
                .map_err(|e| e.with_frames(frames_of(&chain)));

            self.globals = r.into_scope();
            self.program.globals.push(stmt?);
        }

        Ok(())
    }

    fn seed_statics(&mut self) -> CompileResult<()> {
        let templates = self.templates;

        for (i, f) in templates.functions.iter().enumerate() {
            if !f.is_static {
                continue;
            }

            let key = FnKey::new(&f.name, Vec::new());
            self.fn_matches.insert(
                key.serialize(),
                Some(TemplateMatch {
                    template: i,
                    bindings: Bindings::new(),
                }),
            );

            self.program.statics.push(key.clone());
            self.enqueue_function(key, Some(f.span), &[])?;
        }

        Ok(())
    }

    fn seed_main(&mut self) -> CompileResult<()> {
        let m = self.match_function("main", &[]).ok_or_else(|| {
            CompileError::new(ErrorKind::NoMatchingFunction, "no function matches main()")
        })?;

        let key = FnKey::new("main", Vec::new());

        self.program.main_is_async = self.templates.functions[m.template].is_async;
        self.program.main = Some(key.clone());
        self.enqueue_function(key, None, &[])
    }

    fn drain(&mut self) -> CompileResult<()> {
        loop {
            if let Some(job) = self.fn_queue.pop_front() {
                self.instantiate_function(job)?;
                continue;
            }

            if let Some(job) = self.class_queue.pop_front() {
                self.instantiate_class(job)?;
                continue;
            }

            return Ok(());
        }
    }

    /// Fails once `origin` already appears `max_depth` times in the demand chain.
    /// Long chains through distinct templates are fine; only a template that keeps
    /// re-instantiating itself with new arguments can run away.
    fn depth_check(
        &self,
        what: &str,
        origin: &str,
        site: Option<Span>,
        parent: &[InstantiationFrame],
    ) -> CompileResult<()> {
        let nesting = parent
            .iter()
            .filter(|f| f.origin.as_deref() == Some(origin))
            .count();

        if nesting < self.max_depth {
            return Ok(());
        }

        let mut e = CompileError::new(
            ErrorKind::InstantiationDepth,
            format!(
                "instantiating {what} nests {origin} deeper than the limit of {}",
                self.max_depth
            ),
        );
        if let Some(s) = site {
            e = e.at(s);
        }

        Err(e.with_frames(frames_of(parent)))
    }

    /// Queues `key` for instantiation unless it already was
    pub(super) fn enqueue_function(
        &mut self,
        key: FnKey,
        site: Option<Span>,
        parent: &[InstantiationFrame],
    ) -> CompileResult<()> {
        let id = key.serialize();
        if self.fn_seen.contains(&id) {
            trace!("{id} is already queued");
            return Ok(());
        }

        let origin = format!("fn {}", key.name);
        self.depth_check(&id, &origin, site, parent)?;

        let mut chain = parent.to_vec();
        chain.push(InstantiationFrame {
            site,
            description: format!("while instantiating {id}"),
            origin: Some(origin),
        });

        debug!("queueing function {id}");
        self.fn_seen.insert(id);
        self.fn_queue.push_back(Job { key, chain });

        Ok(())
    }

    /// Queues `ty`, and every type nested in it, for class instantiation.
    /// Symbol types are never instantiated.
    pub(super) fn enqueue_class(
        &mut self,
        ty: &Type,
        site: Option<Span>,
        parent: &[InstantiationFrame],
    ) -> CompileResult<()> {
        if ty.is_symbol() {
            return Ok(());
        }

        let id = ty.serialize();
        if !self.class_seen.contains(&id) {
            let origin = format!("class {}", ty.base_name());
            self.depth_check(&id, &origin, site, parent)?;

            let mut chain = parent.to_vec();
            chain.push(InstantiationFrame {
                site,
                description: format!("while instantiating class {id}"),
                origin: Some(origin),
            });

            debug!("queueing class {id}");
            self.class_seen.insert(id);
            self.class_queue.push_back(Job {
                key: ty.clone(),
                chain,
            });
        }

        if let Type::Template(_, args) = ty {
            for a in args {
                self.enqueue_class(a, site, parent)?;
            }
        }

        Ok(())
    }

    /// The most specialized function template named `name` that accepts `args`.
    /// Computed once per key.
    pub(super) fn match_function(&mut self, name: &str, args: &[Type]) -> Option<TemplateMatch> {
        let id = format!("{name}({})", serialize_list(args));

        if let Some(hit) = self.fn_matches.get(&id) {
            trace!("match cache hit for {id}");
            return hit.clone();
        }

        let templates = self.templates;
        let target = Type::Template("fn".to_owned(), args.to_vec());

        let candidates = templates
            .functions_named(name)
            .iter()
            .filter(|&&i| !templates.functions[i].is_static)
            .filter_map(|&i| {
                templates.functions[i]
                    .signature
                    .bind(&target, &Bindings::new())
                    .map(|b| (i, b))
            });

        let found = best_by(candidates, |c: &(usize, Bindings)| {
            &templates.functions[c.0].signature
        })
        .map(|(template, bindings)| TemplateMatch { template, bindings });

        match &found {
            Some(m) => debug!(
                "{id} matches {} with {}",
                templates.functions[m.template].display_signature(),
                m.bindings
            ),
            None => debug!("nothing matches {id}"),
        }

        self.fn_matches.insert(id, found.clone());
        found
    }

    /// The most specialized class template whose pattern matches `ty`
    pub(super) fn match_class(&mut self, ty: &Type) -> Option<TemplateMatch> {
        let id = ty.serialize();

        if let Some(hit) = self.class_matches.get(&id) {
            trace!("class match cache hit for {id}");
            return hit.clone();
        }

        let templates = self.templates;

        let candidates = templates
            .classes_named(ty.base_name())
            .iter()
            .filter_map(|&i| {
                templates.classes[i]
                    .pattern
                    .bind(ty, &Bindings::new())
                    .map(|b| (i, b))
            });

        let found = best_by(candidates, |c: &(usize, Bindings)| &templates.classes[c.0].pattern)
            .map(|(template, bindings)| TemplateMatch { template, bindings });

        self.class_matches.insert(id, found.clone());
        found
    }

    /// Resolved attributes of the class `ty` matches, or None if no class matches it
    pub(super) fn class_attributes(&mut self, ty: &Type) -> CompileResult<Option<Vec<(String, Type)>>> {
        let m = match self.match_class(ty) {
            Some(m) => m,
            None => return Ok(None),
        };

        self.templates.classes[m.template]
            .attributes
            .iter()
            .map(|a| {
                let t = a.ty.resolve(&m.bindings).map_err(|e| e.at(a.span))?;
                Ok((a.name.clone(), t))
            })
            .collect::<CompileResult<Vec<_>>>()
            .map(Some)
    }

    /// Signatures of every non-static template named `name`, for messages
    pub(super) fn candidates_for(&self, name: &str) -> Vec<String> {
        self.templates
            .functions_named(name)
            .iter()
            .map(|&i| &self.templates.functions[i])
            .filter(|f| !f.is_static)
            .map(|f| f.display_signature())
            .collect()
    }

    fn instantiate_function(&mut self, job: Job<FnKey>) -> CompileResult<()> {
        let site = job.chain.last().and_then(|f| f.site);
        let fail = |e: CompileError| {
            let e = match site {
                Some(s) => e.at(s),
                None => e,
            };
            e.with_frames(frames_of(&job.chain))
        };

        let m = self
            .match_function(&job.key.name, &job.key.args)
            .ok_or_else(|| {
                fail(CompileError::new(
                    ErrorKind::NoMatchingFunction,
                    format!("no function matches {}", job.key),
                ))
            })?;

        let templates = self.templates;
        let template = &templates.functions[m.template];
        debug!(
            "instantiating {} from {} at line {}",
            job.key,
            template.display_signature(),
            template.span.line
        );

        let f = resolve::instantiate_function(self, template, &job.key, m.bindings, &job.chain)
            .map_err(|e| e.with_frames(frames_of(&job.chain)))?;

        self.program.functions.push(f);
        Ok(())
    }

    fn instantiate_class(&mut self, job: Job<Type>) -> CompileResult<()> {
        let site = job.chain.last().and_then(|f| f.site);
        let fail = |e: CompileError| {
            let e = match site {
                Some(s) => e.at(s),
                None => e,
            };
            e.with_frames(frames_of(&job.chain))
        };

        let m = self.match_class(&job.key).ok_or_else(|| {
            fail(CompileError::new(
                ErrorKind::NoMatchingClass,
                format!("no class matches {}", job.key),
            ))
        })?;

        let templates = self.templates;
        let template = &templates.classes[m.template];
        debug!(
            "instantiating class {} from {} at line {}",
            job.key, template.pattern, template.span.line
        );

        let attributes = self.class_attributes(&job.key).map_err(fail)?.unwrap_or_default();

        for (a, (_, ty)) in template.attributes.iter().zip(attributes.iter()) {
            self.enqueue_class(ty, Some(a.span), &job.chain)?;
        }

        self.program.classes.push(InstantiatedClass {
            ty: job.key,
            span: template.span,
            is_native: template.is_native,
            is_abstract: template.is_abstract,
            attributes,
        });

        Ok(())
    }
}
