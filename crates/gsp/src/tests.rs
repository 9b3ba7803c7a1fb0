// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

use crate::*;
use serde_json::json;
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// Helper function to create a development engine over an in-memory resolver
fn create_engine(resolver: &MemoryResourceResolver, tags: TagLibraryRegistry) -> Engine<MemoryResourceResolver> {
    create_engine_with_config(resolver, tags, GspConfig::default())
}

fn create_engine_with_config(
    resolver: &MemoryResourceResolver,
    tags: TagLibraryRegistry,
    config: GspConfig,
) -> Engine<MemoryResourceResolver> {
    Engine::new(resolver.clone(), Arc::new(tags), config).unwrap()
}

fn production() -> GspConfig {
    GspConfig::default().with_environment(Environment::Production)
}

// Renders a single page source with a development engine
fn render_source(source: &str, binding: &Binding) -> Result<String> {
    render_with_tags(source, binding, test_tags())
}

fn render_with_tags(source: &str, binding: &Binding, tags: TagLibraryRegistry) -> Result<String> {
    let resolver = MemoryResourceResolver::new();
    resolver.add_template("test.gsp", source);
    let engine = create_engine(&resolver, tags);
    engine.render_uri("test.gsp", binding)
}

fn lua_string(call: &TagCall<'_>, text: &str) -> Result<Value> {
    Ok(Value::String(call.lua.create_string(text)?))
}

// A small tag library exercising both arities and value-returning tags
fn test_tags() -> TagLibraryRegistry {
    let mut tags = TagLibraryRegistry::new();
    tags.register("my", "wrap", TagArity::AttrsAndBody, |call| {
        let body = call.body()?;
        call.write(&body)?;
        Ok(Value::Nil)
    })
    .register("my", "twice", TagArity::AttrsAndBody, |call| {
        let body = call.body()?;
        call.write(&body)?;
        call.write(&body)?;
        Ok(Value::Nil)
    })
    .register("my", "open", TagArity::AttrsOnly, |call| {
        call.write("[")?;
        Ok(Value::Nil)
    })
    .register("my", "loop", TagArity::AttrsAndBody, |call| {
        let times = call.attr_string("times")?.unwrap_or_else(|| "3".into());
        let times: i64 = times.parse().unwrap_or(0);
        for i in 1..=times {
            let text = call.body_with(BodyArgs::It(Value::Integer(i)))?;
            call.write(&text)?;
        }
        Ok(Value::Nil)
    })
    .register("my", "with", TagArity::AttrsAndBody, |call| {
        let greeting = lua_string(call, "hi")?;
        let text = call.body_with(BodyArgs::Vars(vec![("greeting".into(), greeting)]))?;
        call.write(&text)?;
        Ok(Value::Nil)
    })
    .register_returning("my", "join", TagArity::AttrsOnly, |call| {
        let a = call.attr_string("a")?.unwrap_or_default();
        let b = call.attr_string("b")?.unwrap_or_default();
        lua_string(call, &format!("{}-{}", a, b))
    })
    .register("my", "fail", TagArity::AttrsOnly, |_| {
        Err(GspError::ResolutionError("missing thing".into()))
    })
    .register("my", "hello", TagArity::AttrsOnly, |call| {
        call.write("hi")?;
        Ok(Value::Nil)
    })
    .map_uri("http://example.com/tags", "my");
    tags
}

mod examples {
    use super::*;

    #[test]
    fn test_hello_world() {
        let binding = Binding::new().with("name", "World");
        assert_eq!(render_source("Hello ${name}!", &binding).unwrap(), "Hello World!");
    }

    #[test]
    fn test_each_over_table_constructor() {
        let html = render_source(r#"<g:each in="${{1,2,3}}">${it}</g:each>"#, &Binding::new()).unwrap();
        assert_eq!(html, "123");
    }

    #[test]
    fn test_mismatched_close_names_unclosed_tag() {
        let source = "first\n<g:if test=\"${true}\">x</g:when>";
        let err = render_source(source, &Binding::new()).unwrap_err();
        match err {
            GspError::ParseError { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains("g:if"), "{}", message);
                assert!(message.contains("was not closed"), "{}", message);
            }
            other => panic!("expected a parse error, got {:?}", other),
        }
    }
}

mod rendering {
    use super::*;

    #[test]
    fn test_static_page_is_identical() {
        let source = "<!DOCTYPE html>\n<html>\n  <body>\n    <p class=\"a\">100% static</p>\n  </body>\n</html>\n";
        assert_eq!(render_source(source, &Binding::new()).unwrap(), source);
        assert_eq!(render_source("  \n\t", &Binding::new()).unwrap(), "  \n\t");
    }

    #[test]
    fn test_large_static_page_is_identical() {
        let line = "<li>item</li>\n";
        let source = line.repeat(10_000);
        assert_eq!(render_source(&source, &Binding::new()).unwrap(), source);
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let resolver = MemoryResourceResolver::new();
        let engine = create_engine(&resolver, test_tags());
        let source = "<ul>\n<g:each in=\"${items}\" var=\"item\">\n  <li>${item}</li>\n</g:each>\n</ul>\n<ul>";
        let a = engine.compile_source("views/list.gsp", source).unwrap();
        let b = engine.compile_source("views/list.gsp", source).unwrap();
        assert_eq!(a.static_fragments(), b.static_fragments());
        assert_eq!(a.line_numbers(), b.line_numbers());
        assert_eq!(a.generated_source(), b.generated_source());
    }

    #[test]
    fn test_identical_fragments_are_registered_once() {
        let resolver = MemoryResourceResolver::new();
        let engine = create_engine(&resolver, test_tags());
        let page = engine.compile_source("a.gsp", "<b>x</b>${a}<b>x</b>").unwrap();
        assert_eq!(page.static_fragments(), ["<b>x</b>".to_string()]);
        let html = engine.render(&page, &Binding::new().with("a", 1)).unwrap();
        assert_eq!(html, "<b>x</b>1<b>x</b>");
    }

    #[test]
    fn test_each_with_var_and_status() {
        let binding = Binding::new().with("items", json!(["a", "b"]));
        let html = render_source(
            r#"<g:each in="${items}" var="item" status="i">${i}=${item};</g:each>"#,
            &binding,
        )
        .unwrap();
        assert_eq!(html, "0=a;1=b;");
    }

    #[test]
    fn test_each_over_map_is_sorted_by_key() {
        let binding = Binding::new().with("m", json!({"b": 2, "a": 1}));
        let html = render_source(r#"<g:each in="${m}">${it.key}${it.value}</g:each>"#, &binding).unwrap();
        assert_eq!(html, "a1b2");
    }

    #[test]
    fn test_conditionals() {
        let source = r#"<g:if test="${n == 1}">one</g:if><g:elseif test="${n == 2}">two</g:elseif><g:else>many</g:else>"#;
        for (n, expected) in [(1, "one"), (2, "two"), (3, "many")] {
            let html = render_source(source, &Binding::new().with("n", n)).unwrap();
            assert_eq!(html, expected);
        }
    }

    #[test]
    fn test_truthiness() {
        let source = r#"<g:if test="${v}">T</g:if><g:else>F</g:else>"#;
        for (value, expected) in [
            (json!(0), "F"),
            (json!(""), "F"),
            (json!([]), "F"),
            (json!(null), "F"),
            (json!(false), "F"),
            (json!("x"), "T"),
            (json!([1]), "T"),
            (json!(2), "T"),
        ] {
            let html = render_source(source, &Binding::new().with("v", value.clone())).unwrap();
            assert_eq!(html, expected, "value {}", value);
        }
    }

    #[test]
    fn test_while_with_scriptlets() {
        let html = render_source(
            "<% local n = 0 %><g:while test=\"${n < 3}\"><% n = n + 1 %>${n}</g:while>",
            &Binding::new(),
        )
        .unwrap();
        assert_eq!(html, "123");
    }

    #[test]
    fn test_declarations_and_raw_expressions() {
        let source = "<%! local function shout(s) return s:upper() end %>${shout(name)} <%= '<b>' %>";
        let binding = Binding::new().with("name", "hey");
        assert_eq!(render_source(source, &binding).unwrap(), "HEY <b>");
    }

    #[test]
    fn test_out_shift_operator() {
        let html = render_source("<% local _ = out << 'a' << 1 %>|<% out:print('b') %>", &Binding::new()).unwrap();
        assert_eq!(html, "a1|b");
    }

    #[test]
    fn test_interpolated_attribute() {
        let html = render_with_tags(
            r#"<my:join a="x${n}y" b='${n + 1}'/>"#,
            &Binding::new().with("n", 1),
            test_tags(),
        )
        .unwrap();
        assert_eq!(html, "x1y-2");
    }

    #[test]
    fn test_content_type_directive() {
        let resolver = MemoryResourceResolver::new();
        resolver.add_template("a.gsp", "<%@ page contentType=\"text/plain\" %>x");
        resolver.add_template("b.gsp", "x");
        let engine = create_engine(&resolver, TagLibraryRegistry::new());
        assert_eq!(engine.template("a.gsp").unwrap().content_type(), "text/plain");
        assert_eq!(
            engine.template("b.gsp").unwrap().content_type(),
            "text/html;charset=UTF-8"
        );
    }

    #[test]
    fn test_render_to_external_writer() {
        let resolver = MemoryResourceResolver::new();
        resolver.add_template("a.gsp", "Hi ${name}");
        let engine = create_engine(&resolver, TagLibraryRegistry::new());
        let sink = Arc::new(Mutex::new(String::new()));
        let context = OutputContext::new();
        engine
            .template("a.gsp")
            .unwrap()
            .render_to(&Binding::new().with("name", "Ann"), &context, WriteTarget::Writer(sink.clone()))
            .unwrap();
        context.cleanup().unwrap();
        assert_eq!(*sink.lock().unwrap(), "Hi Ann");
    }
}

mod whitespace {
    use super::*;

    #[test]
    fn test_tag_keeping_whitespace_keeps_it() {
        let binding = Binding::new().with("a", true).with("l", json!([1]));
        let html = render_source(
            "<g:if test=\"${a}\">a</g:if>\n  <g:each in=\"${l}\">x</g:each>",
            &binding,
        )
        .unwrap();
        assert_eq!(html, "a\n  x");
    }

    #[test]
    fn test_else_swallows_preceding_whitespace() {
        let source = "<g:if test=\"${a}\">a</g:if>\n  <g:else>b</g:else>";
        assert_eq!(render_source(source, &Binding::new().with("a", false)).unwrap(), "b");
        assert_eq!(render_source(source, &Binding::new().with("a", true)).unwrap(), "a");
    }

    #[test]
    fn test_non_whitespace_before_else_is_an_error() {
        let source = "<g:if test=\"${a}\">a</g:if>x  <g:else>b</g:else>";
        let err = render_source(source, &Binding::new()).unwrap_err();
        assert!(err
            .to_string()
            .contains("cannot have non-whitespace characters directly preceding it"));
    }

    #[test]
    fn test_else_without_if_is_an_error() {
        let err = render_source("<g:else>b</g:else>", &Binding::new()).unwrap_err();
        assert!(err.to_string().contains("must directly follow"));
    }

    #[test]
    fn test_library_tag_flushes_whitespace() {
        let html = render_with_tags("<my:hello/>\n  <my:hello/>", &Binding::new(), test_tags()).unwrap();
        assert_eq!(html, "hi\n  hi");
    }
}

mod tags {
    use super::*;

    #[test]
    fn test_unknown_namespace_passes_through() {
        let html = render_source(r#"<foo:bar a="1">X</foo:bar>"#, &Binding::new()).unwrap();
        assert_eq!(html, r#"<foo:bar a="1">X</foo:bar>"#);
    }

    #[test]
    fn test_passthrough_renders_dynamic_body_and_attributes() {
        let html = render_source(
            r#"<foo:bar a="${1 + 1}" q='say "hi"'>${n}</foo:bar><foo:empty/>"#,
            &Binding::new().with("n", 7),
        )
        .unwrap();
        assert_eq!(html, r#"<foo:bar a="2" q='say "hi"'>7</foo:bar><foo:empty/>"#);
    }

    #[test]
    fn test_passthrough_escapes_mixed_quotes() {
        let html = render_source(r#"<foo:bar x="${'a"b' .. "'c"}"/>"#, &Binding::new()).unwrap();
        assert_eq!(html, r#"<foo:bar x="a&quot;b'c"/>"#);
    }

    #[test]
    fn test_unknown_tag_in_known_namespace_fails() {
        let err = render_source("x\n<my:nope/>", &Binding::new()).unwrap_err();
        match err {
            GspError::TagInvocationError { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains("Tag [my:nope] does not exist"), "{}", message);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_attrs_only_body_renders_after_the_tag() {
        assert_eq!(render_source("<my:open>x${1}</my:open>", &Binding::new()).unwrap(), "[x1");
        assert_eq!(render_source("<my:open>x</my:open>", &Binding::new()).unwrap(), "[x");
    }

    #[test]
    fn test_attrs_and_body_controls_the_body() {
        assert_eq!(render_source("<my:twice>x</my:twice>", &Binding::new()).unwrap(), "xx");
        assert_eq!(render_source("<my:twice><b>${n}</b></my:twice>", &Binding::new().with("n", 1)).unwrap(), "<b>1</b><b>1</b>");
        assert_eq!(render_source("<my:twice/>", &Binding::new()).unwrap(), "");
    }

    #[test]
    fn test_body_rebinds_it() {
        let html = render_source("<my:loop times=\"3\">${it};</my:loop>", &Binding::new()).unwrap();
        assert_eq!(html, "1;2;3;");
    }

    #[test]
    fn test_body_variables_are_scoped_to_the_body() {
        let html = render_source(
            "<my:with>${greeting}</my:with>[${greeting}]",
            &Binding::new(),
        )
        .unwrap();
        assert_eq!(html, "hi[]");
    }

    #[test]
    fn test_returned_values_are_printed() {
        let html = render_source(r#"<my:join a="1" b="2"/>"#, &Binding::new()).unwrap();
        assert_eq!(html, "1-2");
    }

    #[test]
    fn test_taglib_uri_dispatch() {
        let html = render_source(
            r#"<%@ taglib prefix="x" uri="http://example.com/tags" %><x:hello/>"#,
            &Binding::new(),
        )
        .unwrap();
        assert_eq!(html, "hi");
    }

    #[test]
    fn test_nested_failure_is_reported_at_outermost_tag() {
        let source = "top\n<my:wrap>\n  <my:wrap>\n    <my:fail/>\n  </my:wrap>\n</my:wrap>";
        let err = render_source(source, &Binding::new()).unwrap_err();
        match err {
            GspError::TagInvocationError { page, line, message, cause } => {
                assert_eq!(page, "test.gsp");
                assert_eq!(line, 2);
                assert!(message.contains("<my:fail>"), "{}", message);
                assert!(message.contains("missing thing"), "{}", message);
                assert!(matches!(cause.as_deref(), Some(GspError::ResolutionError(_))));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_output_stack_depth_is_restored() {
        let resolver = MemoryResourceResolver::new();
        resolver.add_template("ok.gsp", "<my:wrap><my:twice><my:wrap>x</my:wrap></my:twice></my:wrap>");
        resolver.add_template("bad.gsp", "<my:wrap><my:wrap><my:fail/></my:wrap></my:wrap>");
        let engine = create_engine(&resolver, test_tags());

        let context = OutputContext::new();
        let outer = OutputBuffer::new();
        context
            .stack_or_create()
            .unwrap()
            .lock()
            .unwrap()
            .push(WriteTarget::Buffer(outer.clone()))
            .unwrap();
        assert_eq!(context.depth(), 1);

        let inner = OutputBuffer::new();
        engine
            .template("ok.gsp")
            .unwrap()
            .render_to(&Binding::new(), &context, WriteTarget::Buffer(inner.clone()))
            .unwrap();
        assert_eq!(context.depth(), 1);
        assert_eq!(inner.contents().unwrap(), "xx");

        let failed = engine
            .template("bad.gsp")
            .unwrap()
            .render_to(&Binding::new(), &context, WriteTarget::Buffer(OutputBuffer::new()));
        assert!(failed.is_err());
        assert_eq!(context.depth(), 1);
        assert!(outer.is_empty().unwrap());
    }

    #[test]
    fn test_layout_capture() {
        let resolver = MemoryResourceResolver::new();
        let source = "<html><head><title>T</title><meta name=\"author\" content=\"me\"/></head><body class=\"x\">B</body></html>";
        resolver.add_template("layout.gsp", source);
        let mut tags = TagLibraryRegistry::new();
        register_layout_capture(&mut tags);
        let config = GspConfig {
            sitemesh_preprocess: true,
            ..GspConfig::default()
        };
        let engine = create_engine_with_config(&resolver, tags, config);

        let context = OutputContext::new();
        let buffer = OutputBuffer::new();
        engine
            .template("layout.gsp")
            .unwrap()
            .render_to(&Binding::new(), &context, WriteTarget::Buffer(buffer.clone()))
            .unwrap();

        assert_eq!(buffer.contents().unwrap(), source);
        assert_eq!(context.captured("title").as_deref(), Some("T"));
        assert_eq!(context.captured("body").as_deref(), Some("B"));
        assert_eq!(context.captured("meta.author").as_deref(), Some("me"));
        assert!(context.captured("head").unwrap().starts_with("<title>T</title>"));
    }
}

mod errors {
    use super::*;

    #[test]
    fn test_expression_failure_reports_template_line() {
        let source = "a\nb\n<p>${missing.x}</p>";
        match render_source(source, &Binding::new()).unwrap_err() {
            GspError::ExpressionError { page, line, expression, .. } => {
                assert_eq!(page, "test.gsp");
                assert_eq!(line, 3);
                assert_eq!(expression, "missing.x");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_production_expression_failure_reports_template_line() {
        let resolver = MemoryResourceResolver::new();
        resolver.add_template("views/err.gsp", "a\nb\n<p>${missing.x}</p>");
        let engine = create_engine_with_config(&resolver, TagLibraryRegistry::new(), production());
        match engine.render_uri("views/err.gsp", &Binding::new()).unwrap_err() {
            GspError::RenderError { page, line, message } => {
                assert_eq!(page, "views/err.gsp");
                assert_eq!(line, 3);
                assert!(message.contains("views/err.gsp:3:"), "{}", message);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_failed_compile_is_cached_until_source_changes() {
        let resolver = MemoryResourceResolver::new();
        resolver.add_template("broken.gsp", "ok\n<g:if test=\"${x}\">");
        let engine = create_engine(&resolver, TagLibraryRegistry::new());

        let first = engine.page("broken.gsp").unwrap_err();
        assert!(matches!(first, GspError::ParseError { line: 2, .. }));
        assert!(engine.cache_contains("broken.gsp"));

        let second = engine.page("broken.gsp").unwrap_err();
        assert_eq!(first.to_string(), second.to_string());

        resolver.add_template("broken.gsp", "fixed");
        assert_eq!(engine.render_uri("broken.gsp", &Binding::new()).unwrap(), "fixed");
    }

    #[test]
    fn test_missing_page_is_not_cached() {
        let resolver = MemoryResourceResolver::new();
        let engine = create_engine(&resolver, TagLibraryRegistry::new());
        assert!(matches!(engine.page("nope.gsp"), Err(GspError::ResolutionError(_))));
        assert!(!engine.cache_contains("nope.gsp"));
    }

    #[test]
    fn test_unclosed_tags_at_end_of_input() {
        let err = render_source("<my:wrap>\n<my:wrap>", &Binding::new()).unwrap_err();
        match err {
            GspError::ParseError { line, message, .. } => {
                assert_eq!(line, 1);
                assert!(message.contains("Tags were not closed!"), "{}", message);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}

mod codecs {
    use super::*;

    #[test]
    fn test_page_codec_encodes_expressions() {
        let binding = Binding::new().with("v", "<b>");
        let html = render_source("<%@ page expressionCodec=\"html\" %>${v}|${raw(v)}|<%= v %>", &binding).unwrap();
        assert_eq!(html, "&lt;b&gt;|<b>|<b>");
    }

    #[test]
    fn test_default_codec_from_config() {
        let resolver = MemoryResourceResolver::new();
        resolver.add_template("a.gsp", "${v}");
        resolver.add_template("b.gsp", "<%@ page defaultCodec=\"none\" %>${v}");
        let config = GspConfig {
            default_codec: Some("html".into()),
            ..GspConfig::default()
        };
        let engine = create_engine_with_config(&resolver, TagLibraryRegistry::new(), config);
        let binding = Binding::new().with("v", "a&b");
        assert_eq!(engine.render_uri("a.gsp", &binding).unwrap(), "a&amp;b");
        assert_eq!(engine.render_uri("b.gsp", &binding).unwrap(), "a&b");
    }

    #[test]
    fn test_unknown_default_codec_fails_engine_construction() {
        let config = GspConfig {
            default_codec: Some("htlm".into()),
            ..GspConfig::default()
        };
        let err = Engine::new(MemoryResourceResolver::new(), Arc::new(test_tags()), config).unwrap_err();
        match err {
            GspError::ConfigError(message) => assert!(message.contains("Unknown codec [htlm]"), "{}", message),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_unknown_codec_fails_compile() {
        let err = render_source("<%@ page expressionCodec=\"rot13\" %>x", &Binding::new()).unwrap_err();
        assert!(err.to_string().contains("Unknown codec [rot13]"));
    }
}

mod reloading {
    use super::*;

    #[test]
    fn test_stale_page_is_rebuilt_in_development() {
        let resolver = MemoryResourceResolver::new();
        resolver.add_template("a.gsp", "v1");
        let engine = create_engine(&resolver, TagLibraryRegistry::new());
        assert_eq!(engine.render_uri("a.gsp", &Binding::new()).unwrap(), "v1");

        let before = engine.page("a.gsp").unwrap();
        assert!(Arc::ptr_eq(&before, &engine.page("a.gsp").unwrap()));

        resolver.add_template("a.gsp", "v2");
        assert_eq!(engine.render_uri("a.gsp", &Binding::new()).unwrap(), "v2");
    }

    #[test]
    fn test_production_does_not_reload_unless_enabled() {
        let resolver = MemoryResourceResolver::new();
        resolver.add_template("a.gsp", "v1");
        let engine = create_engine_with_config(&resolver, TagLibraryRegistry::new(), production());
        assert_eq!(engine.render_uri("a.gsp", &Binding::new()).unwrap(), "v1");
        resolver.add_template("a.gsp", "v2");
        assert_eq!(engine.render_uri("a.gsp", &Binding::new()).unwrap(), "v1");

        let config = GspConfig {
            reload_enabled: true,
            ..production()
        };
        let engine = create_engine_with_config(&resolver, TagLibraryRegistry::new(), config);
        assert_eq!(engine.render_uri("a.gsp", &Binding::new()).unwrap(), "v2");
        resolver.add_template("a.gsp", "v3");
        assert_eq!(engine.render_uri("a.gsp", &Binding::new()).unwrap(), "v3");
    }

    #[test]
    fn test_disabled_cache_always_recompiles() {
        let resolver = MemoryResourceResolver::new();
        resolver.add_template("a.gsp", "x");
        let config = GspConfig {
            cache_enabled: false,
            ..GspConfig::default()
        };
        let engine = create_engine_with_config(&resolver, TagLibraryRegistry::new(), config);
        let a = engine.page("a.gsp").unwrap();
        let b = engine.page("a.gsp").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_filesystem_pages() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("views")).unwrap();
        fs::write(temp_dir.path().join("views/hello.gsp"), "Hello ${name}!").unwrap();

        let engine = Engine::new(
            FileSystemResolver::new(temp_dir.path()),
            Arc::new(TagLibraryRegistry::new()),
            GspConfig::default(),
        )
        .unwrap();
        let html = engine
            .render_uri("/views/hello.gsp", &Binding::new().with("name", "disk"))
            .unwrap();
        assert_eq!(html, "Hello disk!");
        assert!(engine.cache_contains("views/hello.gsp"));
    }
}

mod precompiled {
    use super::*;

    fn precompile(dir: &TempDir, source: &str) {
        let resolver = MemoryResourceResolver::new();
        resolver.add_template("views/a.gsp", source);
        let engine = create_engine_with_config(&resolver, test_tags(), production());
        let path = engine.precompile("views/a.gsp", dir.path()).unwrap();
        assert!(path.ends_with("views_a_gsp.lua"));
        assert!(dir.path().join("views_a_gsp.meta.json").is_file());
    }

    fn precompiled_config(dir: &TempDir) -> GspConfig {
        GspConfig {
            precompiled_dir: Some(dir.path().to_path_buf()),
            ..production()
        }
    }

    #[test]
    fn test_production_uses_precompiled_pages_without_source() {
        let dir = TempDir::new().unwrap();
        precompile(&dir, "<%@ page contentType=\"text/plain\" %><p>${name}</p><my:hello/>");

        // The resolver has no source at all; the page comes from the store
        let engine = create_engine_with_config(&MemoryResourceResolver::new(), test_tags(), precompiled_config(&dir));
        let template = engine.template("views/a.gsp").unwrap();
        assert_eq!(template.content_type(), "text/plain");
        assert_eq!(
            template.render(&Binding::new().with("name", "World")).unwrap(),
            "<p>World</p>hi"
        );
        assert!(template.page().generated_source().is_none());
    }

    #[test]
    fn test_checksum_mismatch_falls_back_to_source() {
        let dir = TempDir::new().unwrap();
        precompile(&dir, "<p>${name}</p>");
        fs::write(dir.path().join("views_a_gsp.lua"), "return function() end").unwrap();

        let resolver = MemoryResourceResolver::new();
        resolver.add_template("views/a.gsp", "<p>source ${name}</p>");
        let engine = create_engine_with_config(&resolver, test_tags(), precompiled_config(&dir));
        let html = engine
            .render_uri("views/a.gsp", &Binding::new().with("name", "World"))
            .unwrap();
        assert_eq!(html, "<p>source World</p>");
    }

    #[test]
    fn test_reload_enabled_serves_edited_source_over_artifact() {
        let dir = TempDir::new().unwrap();
        precompile(&dir, "v1");

        let resolver = MemoryResourceResolver::new();
        resolver.add_template("views/a.gsp", "v1");
        let config = GspConfig {
            reload_enabled: true,
            ..precompiled_config(&dir)
        };
        let engine = create_engine_with_config(&resolver, test_tags(), config);
        assert_eq!(engine.render_uri("views/a.gsp", &Binding::new()).unwrap(), "v1");

        resolver.add_template("views/a.gsp", "v2");
        assert_eq!(engine.render_uri("views/a.gsp", &Binding::new()).unwrap(), "v2");

        let page = engine.page("views/a.gsp").unwrap();
        assert!(page.generated_source().is_some());
        assert!(Arc::ptr_eq(&page, &engine.page("views/a.gsp").unwrap()));
    }

    #[test]
    fn test_development_ignores_precompiled_pages() {
        let dir = TempDir::new().unwrap();
        precompile(&dir, "precompiled");

        let resolver = MemoryResourceResolver::new();
        resolver.add_template("views/a.gsp", "source");
        let config = GspConfig {
            precompiled_dir: Some(dir.path().to_path_buf()),
            ..GspConfig::default()
        };
        let engine = create_engine_with_config(&resolver, test_tags(), config);
        assert_eq!(engine.render_uri("views/a.gsp", &Binding::new()).unwrap(), "source");
    }
}

mod concurrency {
    use super::*;

    #[test]
    fn test_concurrent_renders_keep_their_own_output() {
        let resolver = MemoryResourceResolver::new();
        resolver.add_template(
            "list.gsp",
            "<my:wrap><g:each in=\"${items}\" var=\"item\">${id}:${item};</g:each></my:wrap>",
        );
        let engine = Arc::new(create_engine_with_config(&resolver, test_tags(), production()));

        std::thread::scope(|scope| {
            for id in 0..8 {
                let engine = Arc::clone(&engine);
                scope.spawn(move || {
                    for round in 0..25 {
                        let binding = Binding::from_json(json!({
                            "id": id,
                            "items": [round, round + 1],
                        }))
                        .unwrap();
                        let html = engine.render_uri("list.gsp", &binding).unwrap();
                        assert_eq!(html, format!("{id}:{round};{id}:{};", round + 1));
                    }
                });
            }
        });

        assert!(engine.cache_contains("list.gsp"));
    }

    #[test]
    fn test_concurrent_rebuilds_converge_on_latest_source() {
        let resolver = MemoryResourceResolver::new();
        resolver.add_template("a.gsp", "v0");
        let engine = Arc::new(create_engine(&resolver, TagLibraryRegistry::new()));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let engine = Arc::clone(&engine);
                scope.spawn(move || {
                    for _ in 0..20 {
                        let html = engine.render_uri("a.gsp", &Binding::new()).unwrap();
                        assert!(html.starts_with('v'));
                    }
                });
            }
            for version in 1..=5 {
                resolver.add_template("a.gsp", format!("v{version}"));
            }
        });

        assert_eq!(engine.render_uri("a.gsp", &Binding::new()).unwrap(), "v5");
    }
}
