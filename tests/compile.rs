use std::collections::HashSet;

use indoc::indoc;

use ttc::{
    mir::{
        expressions::{TypedExprKind, TypedStmtKind},
        FnKey, InstantiatedBody, Program,
    },
    types::Type,
    CompileError, Compiler, CompilerConfig, ErrorKind,
};

fn compiler(src: &str) -> Compiler {
    let mut c = Compiler::new(CompilerConfig::default());
    c.add_source("main.tt", src);
    c
}

fn compile(src: &str) -> String {
    let c = compiler(src);
    match c.compile() {
        Ok(js) => js,
        Err(e) => panic!("{}", c.render_error(&e)),
    }
}

fn fail(src: &str) -> CompileError {
    compiler(src).compile().unwrap_err()
}

fn instantiate(src: &str) -> Program {
    compiler(src).instantiate().unwrap()
}

/// The generated name a type comment gives the instantiation `key`
fn generated_name<'a>(js: &'a str, key: &str) -> &'a str {
    js.lines()
        .find(|l| l.starts_with(&format!("// fn {key} ")))
        .and_then(|l| l.rsplit("=> ").next())
        .unwrap_or_else(|| panic!("no type comment for {key}"))
}

#[test]
fn each_instantiation_gets_its_own_name() {
    let js = compile(indoc! {r#"
        fn id($T x) $T { return x; }

        fn main() {
            print(id(1));
            print(id("one"));
        }
    "#});

    let int = generated_name(&js, "id(Int)");
    let string = generated_name(&js, "id(String)");

    assert_ne!(int, string);
    assert!(js.contains(&format!("function {int}(x)")));
    assert!(js.contains(&format!("function {string}(x)")));
}

#[test]
fn the_most_specialized_overload_wins() {
    let p = instantiate(indoc! {r#"
        fn show($T x) String { return "any"; }
        fn show(Int x) String { return "int"; }

        fn main() {
            print(show(1));
            print(show(true));
        }
    "#});

    let returned = |key: FnKey| match &p.function(&key).unwrap().body {
        InstantiatedBody::Block(b) => match &b[0].kind {
            TypedStmtKind::Return(Some(e)) => match &e.kind {
                TypedExprKind::Str(s) => s.clone(),
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        },
        _ => panic!("show is not native"),
    };

    assert_eq!(returned(FnKey::new("show", vec![Type::int()])), "int");
    assert_eq!(returned(FnKey::new("show", vec![Type::bool()])), "any");
}

#[test]
fn no_match_names_the_call_and_the_candidates() {
    let e = fail(indoc! {r#"
        fn greet(String who) { print(who); }

        fn main() {
            greet(1);
        }
    "#});

    assert_eq!(e.kind, ErrorKind::NoMatchingFunction);
    assert!(e.message.contains("greet(Int)"), "{}", e.message);
    assert!(e.message.contains("greet(String)"), "{}", e.message);
    assert!(e.is_instantiation_error());
    assert_eq!(e.span.map(|s| s.line), Some(4));
}

#[test]
fn malloc_builds_an_object_in_attribute_order() {
    let js = compile(indoc! {"
        class Point { let x Float; let y Float; }

        fn main() {
            final p = malloc(Point, 1, 2.5);
            print(p.y);
        }
    "});

    assert!(js.contains("({ x: 1, y: 2.5 })"), "{js}");
    assert!(js.contains(r#"Object.freeze({"attributes":["x","y"],"name":"Point"})"#), "{js}");
}

#[test]
fn malloc_checks_its_arguments() {
    let e = fail(indoc! {"
        class Point { let x Int; let y Int; }
        fn main() { final p = malloc(Point, 1); }
    "});
    assert_eq!(e.kind, ErrorKind::TypeMismatch);
    assert!(e.message.contains("(x Int, y Int)"), "{}", e.message);

    let e = fail(indoc! {r#"
        class Point { let x Int; let y Int; }
        fn main() { final p = malloc(Point, 1, "two"); }
    "#});
    assert_eq!(e.kind, ErrorKind::TypeMismatch);
    assert!(e.message.contains("attribute y"), "{}", e.message);

    let e = fail("fn main() { final i = malloc(Int); }");
    assert_eq!(e.kind, ErrorKind::TypeMismatch);
    assert!(e.message.contains("native"), "{}", e.message);
}

#[test]
fn a_user_malloc_cannot_shadow_the_builtin() {
    let e = fail(indoc! {"
        class Point { let x Int; let y Int; }
        fn malloc($C c, Int x, Int y) $C { return c; }
        fn main() { final p = malloc(Point, 1, 2); }
    "});

    assert_eq!(e.kind, ErrorKind::MallocShadowed);
}

#[test]
fn output_is_deterministic() {
    let src = indoc! {r#"
        class Pair[$A, $B] { let a $A; let b $B; }

        let greeting = "hi";
        static { print(greeting); }

        fn swap(Pair[$A, $B] p) Pair[$B, $A] { return malloc(Pair[$B, $A], p.b, p.a); }

        fn main() {
            final p = swap(malloc(Pair[Int, String], 1, "x"));
            for (x in [1, 2, 3]) { print(x); }
            print(p.a);
        }
    "#};

    assert_eq!(compile(src), compile(src));
}

#[test]
fn every_key_is_instantiated_at_most_once() {
    let p = instantiate(indoc! {"
        fn id($T x) $T { return x; }
        fn twice($T x) $T { return id(id(x)); }

        fn main() {
            print(twice(1));
            print(id(2));
            print(twice(3));
        }
    "});

    assert_eq!(p.instantiation_count(&FnKey::new("id", vec![Type::int()])), 1);
    assert_eq!(p.instantiation_count(&FnKey::new("twice", vec![Type::int()])), 1);

    let keys: HashSet<String> = p.functions.iter().map(|f| f.key.serialize()).collect();
    assert_eq!(keys.len(), p.functions.len());
}

#[test]
fn autos_are_deleted_in_declaration_order() {
    let js = compile(indoc! {r#"
        class Res { let name String; }

        fn delete(Res r) { print("delete " + r.name); }

        fn main() {
            print("before");
            auto a = malloc(Res, "a");
            auto b = malloc(Res, "b");
            print("body");
        }
    "#});

    let delete = generated_name(&js, "delete(Res)");

    let guard = js.find("const $auto0 = [];").unwrap();
    let a = js.find("const a = ").unwrap();
    let b = js.find("const b = ").unwrap();
    assert!(guard < a && a < b);

    assert_eq!(js.matches(&format!("{delete}(a)")).count(), 1);
    assert_eq!(js.matches(&format!("{delete}(b)")).count(), 1);
    assert!(js.contains("for (const $d of $auto0) $d();"));
    assert!(!js.contains("$auto1"));
}

#[test]
fn duplicate_definitions_are_rejected() {
    let e = fail(indoc! {"
        fn f(Int x) { }
        fn f(Int y) { }
        fn main() { }
    "});
    assert_eq!(e.kind, ErrorKind::DuplicateDefinition);

    // type variables are compared up to renaming
    let e = fail(indoc! {"
        fn g($T x, $T y) { }
        fn g($U a, $U b) { }
        fn main() { }
    "});
    assert_eq!(e.kind, ErrorKind::DuplicateDefinition);

    let e = fail(indoc! {"
        class Box[$T] { let v $T; }
        class Box[$U] { let w $U; }
        fn main() { }
    "});
    assert_eq!(e.kind, ErrorKind::DuplicateDefinition);
}

#[test]
fn runaway_instantiation_hits_the_depth_limit() {
    let mut c = Compiler::new(CompilerConfig {
        max_instantiation_depth: 8,
        ..Default::default()
    });
    c.add_source(
        "main.tt",
        indoc! {"
            class Box[$T] { let v $T; }
            fn grow($T x) { grow(malloc(Box[$T], x)); }
            fn main() { grow(1); }
        "},
    );

    let e = c.compile().unwrap_err();
    assert_eq!(e.kind, ErrorKind::InstantiationDepth);
    assert!(e.frames.len() >= 8);
    assert!(e.frames.iter().any(|f| f.description.contains("grow(Box[Int])")));
}

#[test]
fn long_chains_of_distinct_functions_are_not_runaway() {
    let mut src = String::from("fn main() { f0(); }\n");
    for i in 0..70 {
        src.push_str(&format!("fn f{i}() {{ f{}(); }}\n", i + 1));
    }
    src.push_str("fn f70() { print(70); }\n");

    let p = instantiate(&src);
    assert!(p.function(&FnKey::new("f70", vec![])).is_some());
}

#[test]
fn shadowing_locals_get_fresh_names() {
    let js = compile(indoc! {"
        fn main() {
            let x = 1;
            if (true) {
                let x = x + 1;
                print(x);
            }
            print(x);
        }
    "});

    let add = generated_name(&js, "__add__(Int, Int)");
    let print = generated_name(&js, "print(Int)");

    assert!(js.contains("let x = 1;"), "{js}");
    assert!(js.contains(&format!("let x$$1 = {add}(x, 1);")), "{js}");
    assert!(js.contains(&format!("{print}(x$$1);")), "{js}");
    assert!(js.contains(&format!("{print}(x);")), "{js}");
}

#[test]
fn block_comments_and_literal_range() {
    compile("/* a\n * b */ fn main() { print(1 /* c */); }");

    let e = fail(&format!("fn main() {{ print({}.0); }}", "9".repeat(400)));
    assert_eq!(e.kind, ErrorKind::Syntax);
    assert!(e.message.contains("out of range"), "{}", e.message);

    let e = fail("fn main() { } /* open");
    assert_eq!(e.kind, ErrorKind::Lex);
}

#[test]
fn lambdas_only_capture_finals() {
    let e = fail(indoc! {"
        fn main() {
            let n = 1;
            final f = fn() Int { return n; };
            print(f());
        }
    "});
    assert_eq!(e.kind, ErrorKind::Capture);

    let js = compile(indoc! {"
        fn main() {
            final n = 1;
            final f = fn(Int x) Int { return x + n; };
            print(f(2));
        }
    "});
    assert!(js.contains("((x) => {"), "{js}");
}

#[test]
fn non_void_functions_must_return() {
    let e = fail(indoc! {"
        fn pick(Bool b) Int {
            if (b) { return 1; }
        }
        fn main() { print(pick(true)); }
    "});

    assert_eq!(e.kind, ErrorKind::Return);
    assert!(e.message.contains("pick(Bool)"), "{}", e.message);
}

#[test]
fn await_needs_an_async_function() {
    let e = fail("fn main() { await sleep(1); }");
    assert_eq!(e.kind, ErrorKind::Scope);

    let js = compile("async fn main() { await sleep(1); }");
    assert!(js.contains("return $rt.async(function* () {"));
    assert!(js.contains("(yield "));
    assert!(js.trim_end().ends_with(", true);"));
}

#[test]
fn ints_widen_to_floats_only_where_the_type_is_declared() {
    compile("fn main() { let f Float = 1; f = 2; print(f); }");

    let e = fail("fn main() { let f Float = 1.5; print(f + 1); }");
    assert_eq!(e.kind, ErrorKind::NoMatchingFunction);
    assert!(e.message.contains("__add__(Float, Int)"), "{}", e.message);
}

#[test]
fn globals_and_statics_run_before_main() {
    let js = compile(indoc! {"
        let counter = 0;
        static { counter = counter + 1; }
        static { counter = counter + 1; }
        fn main() { print(counter); }
    "});

    assert!(js.contains("let counter;"));
    assert!(js.contains("function $globals() {"));

    let run = js.lines().last().unwrap();
    assert!(run.starts_with("$rt.run([$globals, static__$"), "{run}");
    assert_eq!(run.matches("static__$").count(), 2);
}

#[test]
fn missing_attributes_fall_back_to_getattr() {
    let js = compile(indoc! {r#"
        class Bag { let items List[Int]; }

        fn getattr(Bag b, :size) Int { return len(b.items); }

        fn main() {
            final b = malloc(Bag, [1, 2]);
            print(b.size);
        }
    "#});

    let getattr = generated_name(&js, "getattr(Bag, :size)");
    assert!(js.contains(&format!("{getattr}(b)")), "{js}");

    let e = fail(indoc! {"
        class Bag { let items List[Int]; }
        fn main() { final b = malloc(Bag, [1]); print(b.count); }
    "});
    assert_eq!(e.kind, ErrorKind::NoMatchingFunction);
    assert!(e.message.contains("no attribute count"), "{}", e.message);
}

#[test]
fn meta_bodies_see_their_instantiation() {
    let js = compile(r#"fn main() { print(typeName([1])); }"#);
    assert!(js.contains(r#"return "List[Int]";"#), "{js}");
}

#[test]
fn errors_render_with_source_context() {
    let c = compiler("fn main() {\n    nope(1);\n}\n");
    let e = c.compile().unwrap_err();

    colored::control::set_override(false);
    let text = c.render_error(&e);

    assert!(text.contains("no function matches nope(Int)"), "{text}");
    assert!(text.contains("main.tt:2:5"), "{text}");
    assert!(text.contains("nope(1);"), "{text}");
    assert!(text.contains("while instantiating main()"), "{text}");
}
