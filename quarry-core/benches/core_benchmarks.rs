use criterion::{Criterion, black_box, criterion_group, criterion_main};
use quarry_core::citation::{CitationLedger, CitationStyle, Learning};
use quarry_core::fetch::extract;
use quarry_core::research::parse_query_lines;
use quarry_core::search::{MergeStrategy, SearchEngine, SearchResult, merge_results};

fn engine_lists() -> Vec<Vec<SearchResult>> {
    SearchEngine::ALL
        .iter()
        .map(|engine| {
            (0..25)
                .map(|i| {
                    SearchResult::new(
                        format!("https://site{}.example.org/{engine}", i % 15),
                        format!("Solar panel efficiency study {i}"),
                        "Photovoltaic module conversion rates and temperature losses",
                        *engine,
                    )
                })
                .collect()
        })
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let lists = engine_lists();

    c.bench_function("merge_alternate_100", |b| {
        b.iter(|| {
            merge_results(
                black_box(lists.clone()),
                MergeStrategy::Alternate,
                "solar panel efficiency",
                20,
            )
        })
    });

    c.bench_function("merge_relevance_100", |b| {
        b.iter(|| {
            merge_results(
                black_box(lists.clone()),
                MergeStrategy::Relevance,
                "solar panel efficiency",
                20,
            )
        })
    });
}

fn bench_ledger(c: &mut Criterion) {
    c.bench_function("ledger_register_citation_hit", |b| {
        let mut ledger = CitationLedger::new();
        for i in 0..200 {
            ledger.register_citation(&format!("https://s{i}.org"));
        }
        b.iter(|| ledger.register_citation(black_box("https://s150.org")))
    });

    c.bench_function("ledger_add_learning_fuzzy_scan", |b| {
        let mut ledger = CitationLedger::new();
        for i in 0..100 {
            ledger.add_learning(
                Learning::new(format!("fact number {i} about module efficiency"))
                    .with_source("https://a.org"),
            );
        }
        b.iter(|| {
            let mut l = ledger.clone();
            l.add_learning(black_box(
                Learning::new("A brand new observation on inverter losses").with_source("https://b.org"),
            ))
        })
    });

    let text = "Modules reach 22% [1]. Heat costs output [2]. Unknown [40].".repeat(50);
    c.bench_function("ledger_sanitize_citations", |b| {
        let mut ledger = CitationLedger::new();
        for i in 0..10 {
            ledger.register_citation(&format!("https://s{i}.org"));
        }
        b.iter(|| ledger.sanitize_citations(black_box(&text)))
    });

    c.bench_function("ledger_format_bibliography_apa", |b| {
        let mut ledger = CitationLedger::new();
        for i in 0..50 {
            ledger.register_citation(&format!("https://s{i}.org"));
        }
        b.iter(|| ledger.format_bibliography(black_box(CitationStyle::Apa)))
    });
}

fn bench_extract(c: &mut Criterion) {
    let paragraph = "<p>Photovoltaic efficiency depends on cell chemistry, irradiance and \
                     operating temperature; commercial modules sit near twenty-two percent.</p>";
    let html = format!(
        "<html><head><title>Efficiency</title></head><body><nav><a href='/'>Home</a></nav>\
         <article>{}</article><footer>Footer</footer></body></html>",
        paragraph.repeat(40)
    );

    c.bench_function("extract_article_page", |b| {
        b.iter(|| extract(black_box(&html), "https://example.org/pv", 30_000))
    });

    let reply = "Here are the queries:\n1. solar cell efficiency records\n2. perovskite stability\n\
                 3. bifacial module yield\n4. temperature coefficient of silicon";
    c.bench_function("parse_query_lines", |b| {
        b.iter(|| parse_query_lines(black_box(reply), 4))
    });
}

criterion_group!(benches, bench_merge, bench_ledger, bench_extract);
criterion_main!(benches);
