// tests/ttg_fixture.rs
use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, TimeZone};
use scraper::Html;

use tracker_parser::{
    detect_discount, DiscountLevel, DiscountStrategy, Driver, Endpoint, Error, ExtractionSchema, FieldValue,
    PreparedRequest, Registry, Result, SiteConfig, StaticPages,
};

const INDEX: &str = include_str!("fixtures/ttg/index.html");
const USERDETAILS: &str = include_str!("fixtures/ttg/userdetails.html");
const MYBONUS: &str = include_str!("fixtures/ttg/mybonus.html");
const DETAILS: &str = include_str!("fixtures/ttg/details.html");
const BROWSE: &str = include_str!("fixtures/ttg/browse.html");

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn cst() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap()
}

fn size(n: f64, exp: i32) -> u64 {
    (n * 1024f64.powi(exp)).round() as u64
}

fn driver() -> Driver {
    let registry = Registry::builtin().unwrap();
    registry
        .create_driver(&SiteConfig::new("ttg").with_cookie("uid=151907; pass=secret"))
        .unwrap()
}

fn site_pages(userdetails: &str) -> StaticPages {
    StaticPages::new()
        .page("/index.php", INDEX)
        .page("/userdetails.php", userdetails)
        .page("/mybonus.php", MYBONUS)
        .page("/details.php", DETAILS)
}

#[test]
fn user_info_runs_all_three_stages() {
    init_tracing();
    let info = driver().user_info(&site_pages(USERDETAILS)).unwrap();

    assert_eq!(info.site, "ttg");
    assert_eq!(info.id, "151907");
    assert_eq!(info.name, "alice");
    assert_eq!(info.uploaded, size(4.196, 4));
    assert_eq!(info.downloaded, size(1.486, 4));
    assert_eq!(info.ratio, Some(2.823));
    assert_eq!(info.seeding, Some(10));
    assert_eq!(info.leeching, Some(0));
    assert_eq!(info.bonus, Some(908728.22));
    assert_eq!(info.message_count, 3);
    assert_eq!(
        info.join_time,
        Some(cst().with_ymd_and_hms(2019, 9, 3, 23, 2, 35).unwrap())
    );
    assert_eq!(info.level_name.as_deref(), Some("PetaByte"));
    assert_eq!(info.level_id, Some(5));
    assert_eq!(info.bonus_per_hour, Some(27.64));
}

#[test]
fn message_count_falls_back_to_zero_without_mailbox_link() {
    init_tracing();
    let registry = Registry::builtin().unwrap();
    let definition = registry.get("ttg").unwrap();
    let schema =
        ExtractionSchema::compile(definition.user_info.as_ref().unwrap(), definition.offset().unwrap())
            .unwrap();

    let index = INDEX.replace(
        r#"<a href="messages.php?action=viewmailbox&amp;box=1"><img src="pic/inbox.gif" alt="收件箱"></a>"#,
        "",
    );
    assert_ne!(index, INDEX);
    let pages = site_pages(USERDETAILS).page("/index.php", &index);

    let endpoint = Endpoint::new("https://totheglory.im/").unwrap();
    let extraction = schema.run(&pages, &endpoint).unwrap();
    assert_eq!(extraction.get("messageCount"), Some(&FieldValue::Text("0".to_string())));
    assert_eq!(extraction.count("messageCount"), Some(0));
    assert!(!extraction.errors.contains_key("messageCount"));

    let info = driver().user_info(&pages).unwrap();
    assert_eq!(info.message_count, 0);
}

#[test]
fn user_info_requests_carry_id_cookie_and_delay() {
    let pages = site_pages(USERDETAILS);
    let seen: RefCell<Vec<PreparedRequest>> = RefCell::new(Vec::new());
    let source = |request: &PreparedRequest| -> Result<Html> {
        seen.borrow_mut().push(request.clone());
        tracker_parser::DocumentSource::fetch(&pages, request)
    };

    driver().user_info(&source).unwrap();

    let seen = seen.into_inner();
    let urls: Vec<&str> = seen.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://totheglory.im/index.php",
            "https://totheglory.im/userdetails.php?id=151907",
            "https://totheglory.im/mybonus.php",
        ]
    );
    assert_eq!(seen[0].delay, Duration::ZERO);
    assert_eq!(seen[1].delay, Duration::from_millis(500));
    assert!(seen
        .iter()
        .all(|r| r.headers.contains(&("Cookie".to_string(), "uid=151907; pass=secret".to_string()))));
}

#[test]
fn user_info_rejects_a_different_account() {
    init_tracing();
    let other = USERDETAILS.replace("userdetails.php?id=151907", "userdetails.php?id=999");
    let err = driver().user_info(&site_pages(&other)).unwrap_err();

    match err {
        Error::AssertionMismatch {
            stage,
            field,
            expected,
            found,
        } => {
            assert_eq!(stage, 1);
            assert_eq!(field, "id");
            assert_eq!(expected, "151907");
            assert_eq!(found, "999");
        }
        other => panic!("expected an assertion mismatch, got {other:?}"),
    }
}

#[test]
fn torrent_detail_uses_image_discount() {
    init_tracing();
    let item = driver()
        .torrent_detail(&site_pages(USERDETAILS), "https://totheglory.im/details.php?id=712345&hit=1")
        .unwrap();

    assert_eq!(item.id, "712345");
    assert_eq!(item.title, "[BDRip] Some.Movie.2024.1080p.BluRay.x264-TTG");
    assert_eq!(item.size_bytes, size(12.5, 3));
    assert_eq!(item.discount, DiscountLevel::Free);
    assert_eq!(
        item.discount_end_time,
        Some(cst().with_ymd_and_hms(2026, 2, 8, 22, 30, 0).unwrap())
    );
    assert!(!item.has_hr);
    assert_eq!(item.source_site, "ttg");
}

#[test]
fn torrent_detail_needs_an_id_in_the_link() {
    let err = driver()
        .torrent_detail(&site_pages(USERDETAILS), "https://totheglory.im/browse.php")
        .unwrap_err();
    assert!(matches!(err, Error::Parse(_)));
}

#[test]
fn discount_strategy_from_registry() {
    let registry = Registry::builtin().unwrap();
    let strategy = registry.discount_strategy("ttg").unwrap();

    let doc = Html::parse_document(DETAILS);
    let result = detect_discount(&doc, strategy.as_ref());
    assert_eq!(result.level, DiscountLevel::Free);
    assert_eq!(
        result.end_time,
        Some(cst().with_ymd_and_hms(2026, 2, 8, 22, 30, 0).unwrap())
    );

    let plain = Html::parse_document(&DETAILS.replace("ico_free.gif", "ico_hot.gif"));
    let result = detect_discount(&plain, strategy.as_ref());
    assert_eq!(result.level, DiscountLevel::None);
    assert_eq!(result.end_time, None);
}

#[test]
fn browse_page_rows() {
    let rows = driver().parse_list(&Html::parse_document(BROWSE)).unwrap();
    assert_eq!(rows.len(), 3);

    let first = &rows[0];
    assert_eq!(first.id.as_deref(), Some("712345"));
    assert_eq!(first.title, "[BDRip] Some.Movie.2024.1080p.BluRay.x264-TTG");
    assert_eq!(first.subtitle.as_deref(), Some("某电影 / 1080p 中字"));
    assert_eq!(first.size_bytes, Some(size(12.5, 3)));
    assert_eq!(first.seeders, Some(88));
    assert_eq!(first.leechers, Some(3));
    assert_eq!(first.snatched, Some(1204));
    assert_eq!(first.discount, DiscountLevel::Free);
    assert_eq!(
        first.discount_end_time,
        Some(cst().with_ymd_and_hms(2026, 2, 8, 22, 30, 0).unwrap())
    );
    assert_eq!(first.category.as_deref(), Some("电影"));
    assert_eq!(
        first.upload_time,
        Some(cst().with_ymd_and_hms(2026, 1, 28, 12, 1, 44).unwrap())
    );

    assert_eq!(rows[1].discount, DiscountLevel::Percent50);
    assert_eq!(rows[1].discount_end_time, None);
    assert_eq!(rows[1].size_bytes, Some(size(48.2, 3)));

    assert_eq!(rows[2].discount, DiscountLevel::None);
    assert_eq!(rows[2].size_bytes, Some(size(612.4, 2)));
    assert_eq!(rows[2].subtitle, None);
}

#[test]
fn ttg_requires_cookie() {
    let registry = Registry::builtin().unwrap();
    let err = registry.create_driver(&SiteConfig::new("ttg")).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

const fn assert_send_sync<T: Send + Sync + ?Sized>() {}

const _: () = {
    assert_send_sync::<Driver>();
    assert_send_sync::<Registry>();
    assert_send_sync::<ExtractionSchema>();
    assert_send_sync::<Arc<dyn DiscountStrategy>>();
};

#[test]
fn one_driver_serves_many_threads() {
    let driver = driver();
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let item = driver.parse_detail(&Html::parse_document(DETAILS), "712345");
                assert_eq!(item.discount, DiscountLevel::Free);
                let rows = driver.parse_list(&Html::parse_document(BROWSE)).unwrap();
                assert_eq!(rows.len(), 3);
            });
        }
    });
}
