//! Integration tests for the plates engine
//!
//! These tests render real template trees from a temporary views directory.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use plates::{
    ArtifactCache, CacheBackend, Config, Engine, Environment, Error, FileCache, MemoryCache, MemoryLocaleLoader,
    ModuleLocation, PropagateErrors, RenderError, RenderOptions,
};
use serde::Serialize;
use serde_json::json;
use tempfile::TempDir;

fn write(root: &Path, name: &str, content: &str) {
    let path = root.join(name);
    fs::create_dir_all(path.parent().expect("template has a parent")).expect("Failed to create view dir");
    fs::write(path, content).expect("Failed to write template");
}

fn config(views: &Path) -> Config {
    Config {
        views_path: views.to_path_buf(),
        ..Default::default()
    }
}

fn strict_engine(views: &Path) -> Engine {
    Engine::builder(config(views))
        .cache(Arc::new(MemoryCache::new()))
        .presenter(Arc::new(PropagateErrors))
        .build()
        .expect("Failed to build engine")
}

fn stored_at(cache: &FileCache, key: &str) -> DateTime<Utc> {
    cache
        .metadata(key)
        .expect("Failed to read cache metadata")
        .expect("artifact is cached")
        .stored_at
}

fn set_mtime(path: &Path, at: DateTime<Utc>) {
    let file = fs::File::options().write(true).open(path).expect("Failed to open template");
    file.set_modified(SystemTime::from(at)).expect("Failed to set mtime");
}

fn touch_future(path: &Path) {
    let file = fs::File::options().write(true).open(path).expect("Failed to open template");
    file.set_modified(SystemTime::now() + Duration::from_secs(3600))
        .expect("Failed to set mtime");
}

// =============================================================================
// Layouts and sections
// =============================================================================

#[test]
fn test_extends_fills_layout_sections() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(
        temp.path(),
        "layouts/main.plate.html",
        "<title>@yield('title', 'Site')</title><main>@yield('content')</main>",
    );
    write(
        temp.path(),
        "home.plate.html",
        "@extends('layouts.main')@usesection('content')<p>Hi {{ $name }}</p>@endsection",
    );
    let engine = strict_engine(temp.path());

    let out = engine.render("home", json!({"name": "Ada"})).expect("render");
    assert_eq!(out, "<title>Site</title><main><p>Hi Ada</p></main>");
}

#[test]
fn test_parent_marker_composes_layout_default() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(
        temp.path(),
        "layouts/main.plate.html",
        "<aside>@usesection('sidebar')Base@show</aside>",
    );
    write(
        temp.path(),
        "page.plate.html",
        "@extends('layouts.main')@usesection('sidebar')@parent Extra@endsection",
    );
    write(
        temp.path(),
        "plain.plate.html",
        "@extends('layouts.main')@usesection('sidebar')Replaced@endsection",
    );
    let engine = strict_engine(temp.path());

    assert_eq!(engine.render("page", json!({})).expect("render"), "<aside>Base Extra</aside>");
    assert_eq!(engine.render("plain", json!({})).expect("render"), "<aside>Replaced</aside>");
}

#[test]
fn test_inline_section_value() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(temp.path(), "layout.plate.html", "[@yield('title')]");
    write(
        temp.path(),
        "child.plate.html",
        "@extends('layout')@usesection('title', $title)",
    );
    let engine = strict_engine(temp.path());

    assert_eq!(engine.render("child", json!({"title": "Docs"})).expect("render"), "[Docs]");
}

#[test]
fn test_unclosed_section_faults() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(temp.path(), "broken.plate.html", "@usesection('x')never closed");
    let engine = strict_engine(temp.path());

    assert!(matches!(
        engine.render("broken", json!({})),
        Err(Error::Render(RenderError::Section(_)))
    ));
}

#[test]
fn test_closing_callers_section_from_include_faults() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(temp.path(), "outer.plate.html", "@usesection('s')@include('closer')@endsection");
    write(temp.path(), "closer.plate.html", "@endsection");
    let engine = strict_engine(temp.path());

    assert!(matches!(
        engine.render("outer", json!({})),
        Err(Error::Render(RenderError::Section(ref msg))) if msg.contains("opened it")
    ));
}

// =============================================================================
// Control flow
// =============================================================================

#[test]
fn test_forelse_renders_empty_branch() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(
        temp.path(),
        "list.plate.html",
        "@forelse($items as $item)<li>{{ $item }}</li>@empty<p>none</p>@endforelse",
    );
    let engine = strict_engine(temp.path());

    assert_eq!(
        engine.render("list", json!({"items": ["a", "b"]})).expect("render"),
        "<li>a</li><li>b</li>"
    );
    assert_eq!(engine.render("list", json!({"items": []})).expect("render"), "<p>none</p>");
}

#[test]
fn test_loops_with_break_and_continue() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(
        temp.path(),
        "loop.plate.html",
        "@foreach($xs as $x)@continue($x == 2)@break($x > 3){{ $x }}@endforeach",
    );
    let engine = strict_engine(temp.path());

    assert_eq!(engine.render("loop", json!({"xs": [1, 2, 3, 4, 5]})).expect("render"), "13");
}

#[test]
fn test_unless_isset_and_default_echo() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(
        temp.path(),
        "flags.plate.html",
        "@unless($admin)guest@endunless|@isset($nick){{ $nick }}@endisset|{{ $title or 'Untitled' }}",
    );
    let engine = strict_engine(temp.path());

    assert_eq!(engine.render("flags", json!({"admin": false})).expect("render"), "guest||Untitled");
    assert_eq!(
        engine
            .render("flags", json!({"admin": true, "nick": "ada", "title": "Home"}))
            .expect("render"),
        "|ada|Home"
    );
}

#[test]
fn test_echo_is_not_escaped_and_escape_helper_is() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(temp.path(), "raw.plate.html", "{{ $html }}|{{ e($html) }}");
    let engine = strict_engine(temp.path());

    assert_eq!(
        engine.render("raw", json!({"html": "<b>x</b>"})).expect("render"),
        "<b>x</b>|&lt;b&gt;x&lt;/b&gt;"
    );
}

#[test]
fn test_comments_never_reach_output() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(temp.path(), "c.plate.html", "a{{-- {{ $secret }} --}}b###note###");
    let engine = strict_engine(temp.path());

    assert_eq!(engine.render("c", json!({})).expect("render"), "ab<!-- note -->");
}

#[derive(Serialize)]
struct Profile {
    name: String,
    tags: Vec<String>,
}

#[test]
fn test_renders_serializable_structs() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(
        temp.path(),
        "profile.plate.html",
        "{{ $name }} ({{ count($tags) }}): {{ join($tags, ', ') }}",
    );
    let engine = strict_engine(temp.path());

    let profile = Profile {
        name: "Ada".to_string(),
        tags: vec!["math".to_string(), "engines".to_string()],
    };
    assert_eq!(engine.render("profile", &profile).expect("render"), "Ada (2): math, engines");
}

// =============================================================================
// Includes
// =============================================================================

#[test]
fn test_include_if_skips_missing_views() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(temp.path(), "nav.plate.html", "<nav/>");
    write(temp.path(), "page.plate.html", "@includeIf('nav')@includeIf('ads')");
    let engine = strict_engine(temp.path());

    assert_eq!(engine.render("page", json!({})).expect("render"), "<nav/>");
}

#[test]
fn test_module_templates_shadow_views() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let views = temp.path().join("views");
    let modules = temp.path().join("modules");
    write(&views, "card.plate.html", "default card");
    write(&modules, "Blog/Views/card.plate.html", "blog card");

    let engine = Engine::builder(Config {
        views_path: views,
        modules: vec![ModuleLocation {
            base: modules,
            offset: "Views/".to_string(),
        }],
        ..Default::default()
    })
    .cache(Arc::new(MemoryCache::new()))
    .build()
    .expect("Failed to build engine");

    assert_eq!(engine.render("card", json!({})).expect("render"), "default card");
    assert_eq!(
        engine
            .render_with("card", json!({}), &RenderOptions::default().module("Blog"))
            .expect("render"),
        "blog card"
    );
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_html_presenter_contains_fault_to_its_include() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(temp.path(), "page.plate.html", "before @include('bad') after");
    write(temp.path(), "bad.plate.html", "partial {{ $missing }}");
    let engine = Engine::builder(config(temp.path()))
        .cache(Arc::new(MemoryCache::new()))
        .build()
        .expect("Failed to build engine");

    let out = engine.render("page", json!({})).expect("render");
    assert!(out.starts_with("before <div class=\"plates-error\""));
    assert!(out.contains("Undefined variable: $missing"));
    assert!(out.ends_with(" after"));
    assert!(!out.contains("partial"));
}

#[test]
fn test_deep_nesting_is_presented_not_fatal() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let engine = Engine::builder(config(temp.path()))
        .cache(Arc::new(MemoryCache::new()))
        .build()
        .expect("Failed to build engine");

    let source = format!("before {{{{ {}1{} }}}} after", "(".repeat(20_000), ")".repeat(20_000));
    let out = engine.render_string(&source, json!({})).expect("render");
    assert!(out.contains("plates-error"));
    assert!(out.contains("nesting deeper than"));
    assert!(!out.contains("before"));
}

#[test]
fn test_largest_integer_key_in_array_literal() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let engine = strict_engine(temp.path());

    let out = engine
        .render_string("{{ count([$k => 1, 2]) }}", json!({"k": u64::MAX}))
        .expect("render");
    assert_eq!(out, "2");
}

#[test]
fn test_denylisted_calls_are_stripped() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(temp.path(), "evil.plate.html", "@php echo 'x'; system('ls'); @endphp");
    let engine = strict_engine(temp.path());

    assert!(matches!(
        engine.render("evil", json!({})),
        Err(Error::Render(RenderError::Syntax { .. }))
    ));
}

// =============================================================================
// Cache
// =============================================================================

#[test]
fn test_development_recompiles_modified_templates() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let views = temp.path().join("views");
    let template = views.join("t.plate.html");
    write(&views, "t.plate.html", "v1");
    let cache = Arc::new(FileCache::new(temp.path().join("cache")));
    let engine = Engine::builder(config(&views))
        .cache(cache.clone())
        .build()
        .expect("Failed to build engine");

    assert_eq!(engine.render("t", json!({})).expect("render"), "v1");
    let key = ArtifactCache::key_for(&engine.locator().source("t", None).expect("source").path);
    let first = stored_at(&cache, &key);

    // Edited one second after the artifact was stored
    write(&views, "t.plate.html", "v2");
    let edited = first + chrono::Duration::seconds(1);
    set_mtime(&template, edited);
    while Utc::now() <= edited {
        std::thread::sleep(Duration::from_millis(50));
    }

    assert_eq!(engine.render("t", json!({})).expect("render"), "v2");
    let modified = engine.locator().source("t", None).expect("source").modified;
    let second = stored_at(&cache, &key);
    assert!(second > first);
    assert!(second >= modified, "stored_at {} predates mtime {}", second, modified);

    // Unchanged mtime: the fresh artifact is served even though the text differs
    write(&views, "t.plate.html", "v3");
    set_mtime(&template, modified);
    assert_eq!(engine.render("t", json!({})).expect("render"), "v2");
    assert_eq!(stored_at(&cache, &key), second);
}

#[test]
fn test_production_trusts_cached_artifacts() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let views = temp.path().join("views");
    write(&views, "t.plate.html", "v1");
    let engine = Engine::builder(Config {
        environment: Environment::Production,
        ..config(&views)
    })
    .cache(Arc::new(FileCache::new(temp.path().join("cache"))))
    .build()
    .expect("Failed to build engine");

    assert_eq!(engine.render("t", json!({})).expect("render"), "v1");
    write(&views, "t.plate.html", "v2");
    touch_future(&views.join("t.plate.html"));
    assert_eq!(engine.render("t", json!({})).expect("render"), "v1");

    engine.purge("t", None).expect("purge");
    assert_eq!(engine.render("t", json!({})).expect("render"), "v2");
}

#[test]
fn test_custom_directive_applies_to_fresh_compiles() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(temp.path(), "d.plate.html", "@datetime($when)");
    let engine = Engine::builder(config(temp.path()))
        .cache(Arc::new(MemoryCache::new()))
        .presenter(Arc::new(PropagateErrors))
        .directive("datetime", |text| text.replace("@datetime($when)", "{{ upper($when) }}"))
        .build()
        .expect("Failed to build engine");

    assert_eq!(engine.render("d", json!({"when": "today"})).expect("render"), "TODAY");
}

// =============================================================================
// Translation
// =============================================================================

#[test]
fn test_lang_files_from_disk() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let views = temp.path().join("views");
    let lang = temp.path().join("lang");
    write(&views, "greet.plate.html", "@lang('messages.hello', ['name' => $name])|@lang('messages.gone')");
    write(&lang, "english/messages.yml", "hello: \"Hello, :NAME\"\n");

    let engine = Engine::builder(Config {
        locale_path: lang,
        ..config(&views)
    })
    .cache(Arc::new(MemoryCache::new()))
    .build()
    .expect("Failed to build engine");

    assert_eq!(
        engine.render("greet", json!({"name": "ada"})).expect("render"),
        "Hello, ADA|messages.gone"
    );
}

#[test]
fn test_choice_counts_arrays() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(temp.path(), "cart.plate.html", "@choice('cart.items', $items, ['n' => count($items)])");
    let mut loader = MemoryLocaleLoader::new();
    loader.insert("english", "cart", [("items", "{0} Empty|{1} One item|[2,*] :n items")]);
    let engine = Engine::builder(config(temp.path()))
        .cache(Arc::new(MemoryCache::new()))
        .locales(Arc::new(loader))
        .build()
        .expect("Failed to build engine");

    assert_eq!(engine.render("cart", json!({"items": []})).expect("render"), "Empty");
    assert_eq!(engine.render("cart", json!({"items": [1]})).expect("render"), "One item");
    assert_eq!(engine.render("cart", json!({"items": [1, 2, 3]})).expect("render"), "3 items");
}
