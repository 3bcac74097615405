//! Property-based checks for the template engine, path hygiene, resolver
//! round-trips, and optimiser idempotence.

use proptest::prelude::*;

use goforge::vfs::clean_rel_path;
use goforge::{Environment, Template, Value};

fn ident() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,10}"
}

proptest! {
    // Rendering the same template twice against the same environment is
    // byte-identical.
    #[test]
    fn rendering_is_deterministic(name in ident(), value in "[a-zA-Z0-9 _-]{0,20}") {
        let mut env = Environment::new();
        env.bind(name.clone(), Value::Str(value));
        let template = Template::parse(&format!("x {{{{ .{name} }}}} y")).unwrap();
        let first = template.render(&env).unwrap();
        let second = template.render(&env).unwrap();
        prop_assert_eq!(first, second);
    }

    // Text without action tags renders to itself.
    #[test]
    fn plain_text_is_identity(text in "[^{}]{0,64}") {
        let template = Template::parse(&text).unwrap();
        let rendered = template.render(&Environment::new()).unwrap();
        prop_assert_eq!(rendered, text);
    }

    // A cleaned path is stable: cleaning it again changes nothing.
    #[test]
    fn clean_rel_path_is_idempotent(path in "[a-z./]{1,30}") {
        if let Ok(cleaned) = clean_rel_path(&path) {
            prop_assert_eq!(clean_rel_path(&cleaned).unwrap(), cleaned);
        }
    }

    // Cleaned paths never contain traversal segments or lead with `/`.
    #[test]
    fn cleaned_paths_cannot_escape(path in "[a-z./]{1,30}") {
        if let Ok(cleaned) = clean_rel_path(&path) {
            prop_assert!(!cleaned.starts_with('/'));
            prop_assert!(!cleaned.split('/').any(|seg| seg == ".."));
            prop_assert!(!cleaned.split('/').any(|seg| seg.is_empty()));
        }
    }

    // camel-then-snake reaches a fixed point after one application.
    #[test]
    fn camel_snake_round_trip_is_stable(word in "[a-z][a-z0-9]{0,8}(_[a-z][a-z0-9]{0,8}){0,3}") {
        let template = Template::parse("{{ .w | camel | snake }}").unwrap();

        let mut env = Environment::new();
        env.bind("w", Value::Str(word));
        let once = template.render(&env).unwrap();

        let mut env2 = Environment::new();
        env2.bind("w", Value::Str(once.clone()));
        let twice = template.render(&env2).unwrap();
        prop_assert_eq!(once, twice);
    }

    // Optimising a well-formed single-block file twice is a no-op the
    // second time.
    #[test]
    fn optimiser_is_idempotent(
        used in prop::collection::btree_set("[a-z]{2,6}", 0..4),
        unused in prop::collection::btree_set("[a-z]{2,6}", 0..4),
    ) {
        let all: Vec<String> = used.iter().chain(unused.iter()).cloned().collect();
        prop_assume!(!all.is_empty());

        let mut src = String::from("package main\n\nimport (\n");
        for name in &all {
            src.push_str(&format!("\t\"{name}\"\n"));
        }
        src.push_str(")\n\nfunc main() {\n");
        for name in &used {
            src.push_str(&format!("\t{name}.Do()\n"));
        }
        src.push_str("}\n");

        if let Some(once) = goforge::optimize::rewrite(&src, "example.com/x").unwrap() {
            prop_assert_eq!(goforge::optimize::rewrite(&once, "example.com/x").unwrap(), None);
        }
    }
}

#[test]
fn resolver_round_trip_over_the_web_blueprint() {
    let registry = goforge::Registry::builtin().expect("builtin registry");
    let blueprint = registry.get("web-api").expect("web-api");

    let combos = [
        [("framework", "gin"), ("database_driver", "none"), ("database_orm", "none")],
        [("framework", "none"), ("database_driver", "sqlite"), ("database_orm", "gorm")],
        [("framework", "chi"), ("database_driver", "postgres"), ("database_orm", "sqlc")],
    ];
    for combo in combos {
        let mut overrides = indexmap::IndexMap::new();
        overrides.insert("project_name".to_string(), "svc".to_string());
        overrides.insert("module_path".to_string(), "example.com/svc".to_string());
        for (k, v) in combo {
            overrides.insert(k.to_string(), v.to_string());
        }
        let config = goforge::resolve(
            blueprint,
            &goforge::ResolveInputs::from_overrides(overrides),
        )
        .unwrap_or_else(|e| panic!("combo {combo:?}: {e}"));

        let again = goforge::resolve(
            blueprint,
            &goforge::ResolveInputs::from_overrides(config.to_overrides()),
        )
        .expect("round trip resolves");
        assert_eq!(config, again, "combo {combo:?}");
    }
}
