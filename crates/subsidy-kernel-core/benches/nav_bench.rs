use std::collections::BTreeMap;

use criterion::{criterion_group, criterion_main, Criterion};
use subsidy_kernel_core::{
    build_index, build_main_menu, build_trees, project_facets, ContentItem, ContentKind,
    GermanCollator, HubAssignment, NodeId, NoHyphenation, SiteConfig, SubsidyField, Term,
    TermAssignment, TermId, TocInputs, Vocabulary,
};

const FIELDS: [SubsidyField; 5] = [
    SubsidyField::SubsidyType,
    SubsidyField::SubsidyRegion,
    SubsidyField::SubsidyPurpose,
    SubsidyField::ContentCategories,
    SubsidyField::SubsidyProvider,
];

fn mk_assignment(index: usize) -> TermAssignment {
    let field = FIELDS[index % FIELDS.len()];
    let tid = 300 + (index % 40) as u32;
    TermAssignment {
        field,
        nid: NodeId(1_000 + (index / 4) as u32),
        tid: TermId(tid),
        label: format!("Förderbegriff {tid}"),
    }
}

fn mk_node(nid: u32, kind: ContentKind, title: &str) -> ContentItem {
    ContentItem {
        nid: NodeId(nid),
        kind,
        title: title.to_string(),
        url: format!("/{}", title.to_lowercase().replace(' ', "-")),
        published: true,
        toc_term: None,
        date: None,
        subsidy: None,
    }
}

fn mk_toc_inputs() -> TocInputs {
    let mut terms = Vec::new();
    let mut nodes = Vec::new();
    let mut node_toc_map = BTreeMap::new();

    for root in 0..8_u32 {
        let root_tid = 1500 + root * 100;
        terms.push(Term {
            tid: TermId(root_tid),
            vocabulary: Vocabulary::Toc,
            name: format!("Sektion {root}"),
            weight: root as i32,
            parents: vec![TermId(1407)],
            path_title: None,
        });
        let root_nid = 2000 + root;
        nodes.push(mk_node(root_nid, ContentKind::MainSectionHub, &format!("Sektion {root}")));
        node_toc_map.insert(NodeId(root_nid), TermId(root_tid));

        for child in 1..=12_u32 {
            let child_tid = root_tid + child;
            terms.push(Term {
                tid: TermId(child_tid),
                vocabulary: Vocabulary::Toc,
                name: format!("Unterthema {root} {child}"),
                weight: 0,
                parents: vec![TermId(root_tid)],
                path_title: None,
            });
            let child_nid = 3000 + root * 100 + child;
            nodes.push(mk_node(
                child_nid,
                ContentKind::SubSectionHub,
                &format!("Unterthema {root} {child}"),
            ));
            node_toc_map.insert(NodeId(child_nid), TermId(child_tid));
        }
    }

    let config = SiteConfig::default();
    terms.push(Term {
        tid: config.subsidy_main_term,
        vocabulary: Vocabulary::Toc,
        name: "Fördermittel".to_string(),
        weight: 50,
        parents: vec![config.main_menu_term],
        path_title: None,
    });
    terms.push(Term {
        tid: config.subsidy_search_term,
        vocabulary: Vocabulary::Toc,
        name: "Fördermittel-Suche".to_string(),
        weight: 0,
        parents: vec![config.subsidy_main_term],
        path_title: None,
    });
    terms.push(Term {
        tid: config.subsidy_hubs_term,
        vocabulary: Vocabulary::Toc,
        name: "Fördermittel nach Themen".to_string(),
        weight: 1,
        parents: vec![config.subsidy_main_term],
        path_title: None,
    });
    nodes.push(mk_node(config.subsidy_search_node.0, ContentKind::SubsidyHub, "Fördermittel"));

    let mut hub_assignments = Vec::new();
    for hub in 0..30_u32 {
        let nid = 4000 + hub;
        nodes.push(mk_node(nid, ContentKind::SubsidyHub, &format!("Fördermittel Thema {hub}")));
        hub_assignments.push(HubAssignment {
            nid: NodeId(nid),
            field: FIELDS[(hub % 4) as usize],
            tid: TermId(600 + hub),
            label: format!("Thema {hub}"),
        });
    }

    TocInputs { terms, nodes, node_toc_map, hub_assignments }
}

fn bench_index(c: &mut Criterion) {
    let assignments = (0..5_000).map(mk_assignment).collect::<Vec<_>>();
    let noise = [TermId(448), TermId(627)];

    c.bench_function("relationship_index_5000_assignments", |b| {
        b.iter(|| {
            let index = build_index(&assignments, &noise);
            if index.is_empty() {
                panic!("index benchmark produced an empty index");
            }
        });
    });
}

fn bench_facets(c: &mut Criterion) {
    let assignments = (0..5_000).map(mk_assignment).collect::<Vec<_>>();
    let index = build_index(&assignments, &[]);
    let config = SiteConfig::default();

    c.bench_function("facets_projection_5000_assignments", |b| {
        b.iter(|| {
            let map = project_facets(&index, &GermanCollator, &NoHyphenation, &config);
            if map.is_empty() {
                panic!("facets benchmark produced an empty map");
            }
        });
    });
}

fn bench_navigation(c: &mut Criterion) {
    let inputs = mk_toc_inputs();
    let config = SiteConfig::default();

    c.bench_function("toc_trees_and_main_menu", |b| {
        b.iter(|| {
            let trees = build_trees(&inputs, &config, &GermanCollator);
            let menu = build_main_menu(&trees.main, &config);
            if menu.is_empty() {
                panic!("navigation benchmark produced an empty menu");
            }
        });
    });
}

criterion_group!(nav_benches, bench_index, bench_facets, bench_navigation);
criterion_main!(nav_benches);
