//! Menu builders over the toc trees, active-state marking, and the
//! breadcrumb assembly that reads the marked menus.

use tracing::warn;

use crate::config::SiteConfig;
use crate::slug::slugify;
use crate::toc::{find_term, TocTrees};
use crate::types::{Breadcrumb, MenuEntry, NavItem, TermId, TocNode, Vocabulary};

const FRONTPAGE_NAME: &str = "startseite";
const SERVICE_NAME: &str = "service";

/// The subsidy main section renders through a grafted copy: the search
/// term's node becomes its node and the hubs term's children become its
/// children. The shared tree is never touched.
fn overlay_root(root: &TocNode, tree: &[TocNode], config: &SiteConfig) -> TocNode {
    if root.term.tid != config.subsidy_main_term {
        return root.clone();
    }
    let mut grafted = root.clone();
    grafted.node =
        find_term(tree, config.subsidy_search_term).and_then(|entry| entry.node.clone());
    grafted.children = find_term(tree, config.subsidy_hubs_term)
        .map(|entry| entry.children.clone())
        .unwrap_or_default();
    grafted
}

/// Builds the main navigation from the main tree. Node-less roots are
/// skipped with their subtrees, node-less children individually.
#[must_use]
pub fn build_main_menu(tree: &[TocNode], config: &SiteConfig) -> Vec<NavItem> {
    let mut menu = Vec::new();
    for root in tree {
        let entry = overlay_root(root, tree, config);
        let Some(node) = entry.node.clone() else {
            continue;
        };
        let name = entry.term.name.clone();
        let lowered = name.to_lowercase();

        if lowered == FRONTPAGE_NAME {
            let mut item = NavItem::link(name, entry.term.tid, "/");
            item.class = Some("frontpage".to_string());
            menu.push(item);
            continue;
        }

        let mut item = NavItem::link(name.clone(), entry.term.tid, node.url.clone());
        item.class = Some(slugify(&name));

        if lowered == SERVICE_NAME {
            for child in &entry.children {
                let Some(child_node) = &child.node else {
                    continue;
                };
                item.children.push(MenuEntry::NavItem(NavItem::link(
                    child.term.name.clone(),
                    child.term.tid,
                    child_node.url.clone(),
                )));
            }
            menu.push(item);
            continue;
        }

        let overview_name = if entry.term.tid == config.subsidy_main_term {
            node.title.clone()
        } else {
            format!("Übersicht {name}")
        };
        item.main =
            Some(Box::new(NavItem::link(overview_name, entry.term.tid, node.url.clone())));

        if entry.term.tid == config.subsidy_main_term {
            push_subsidy_children(&mut item, &entry, config);
        } else {
            for child in &entry.children {
                if child.node.is_none() {
                    continue;
                }
                let fragment = slugify(&child.term.name);
                let mut anchor =
                    NavItem::anchor(child.term.name.clone(), child.term.tid, fragment.clone());
                anchor.url = Some(format!("{}#{fragment}", node.url));
                item.children.push(MenuEntry::NavItem(anchor));
            }
        }
        menu.push(item);
    }

    promote_nationwide(&mut menu, config);
    menu
}

fn push_subsidy_children(item: &mut NavItem, entry: &TocNode, config: &SiteConfig) {
    let mut previous: Option<Vocabulary> = None;
    for child in &entry.children {
        let Some(child_node) = &child.node else {
            continue;
        };
        let vocab = child.term.vocabulary;
        let keep = match vocab {
            Vocabulary::Region | Vocabulary::SubsidyPurpose => true,
            Vocabulary::Categories => config.category_prefix_match(&child.term.name),
            _ => false,
        };
        if !keep {
            continue;
        }
        if previous.is_some_and(|seen| seen != vocab) {
            item.children.push(MenuEntry::Separator);
        }
        previous = Some(vocab);

        let mut nav = NavItem::link(
            format!("Fördermittel {}", child.term.name),
            child.term.tid,
            child_node.url.clone(),
        );
        nav.vocab = Some(vocab);
        item.children.push(MenuEntry::NavItem(nav));
    }
}

/// The nationwide subsidy entry leads its section regardless of the
/// collated order it arrived in.
fn promote_nationwide(menu: &mut [NavItem], config: &SiteConfig) {
    let Some(section) = menu.iter_mut().find(|item| item.tid == config.subsidy_main_term)
    else {
        return;
    };
    let position = section.children.iter().position(|entry| {
        entry.as_nav().is_some_and(|item| item.tid == config.nationwide_term)
    });
    if let Some(at) = position {
        let nationwide = section.children.remove(at);
        section.children.insert(0, nationwide);
    }
}

/// Flat subsidy links for the secondary navigation: the grafted hub
/// entries without the region group, categories first, then types.
#[must_use]
pub fn build_subsidy_menu(tree: &[TocNode], config: &SiteConfig) -> Vec<NavItem> {
    let Some(root) = tree.iter().find(|root| root.term.tid == config.subsidy_main_term) else {
        return Vec::new();
    };
    let entry = overlay_root(root, tree, config);

    let mut categories = Vec::new();
    let mut types = Vec::new();
    for child in &entry.children {
        let Some(node) = &child.node else {
            continue;
        };
        let nav = NavItem::link(child.term.name.clone(), child.term.tid, node.url.clone());
        match child.term.vocabulary {
            Vocabulary::Categories => categories.push(nav),
            Vocabulary::SubsidyTypes => types.push(nav),
            _ => {}
        }
    }
    categories.extend(types);
    categories
}

/// Every attached meta-tree term as a plain link.
#[must_use]
pub fn build_meta_menu(meta: &[TocNode]) -> Vec<NavItem> {
    meta.iter()
        .filter_map(|entry| {
            let node = entry.node.as_ref()?;
            Some(NavItem::link(entry.term.name.clone(), entry.term.tid, node.url.clone()))
        })
        .collect()
}

/// Anchor items for an on-page table of contents, one per resolvable
/// term id, in the order the ids arrive.
#[must_use]
pub fn build_toc_menu(trees: &TocTrees, tids: &[TermId]) -> Vec<NavItem> {
    let mut items = Vec::new();
    for tid in tids {
        let Some(entry) =
            find_term(&trees.main, *tid).or_else(|| find_term(&trees.meta, *tid))
        else {
            warn!(term = tid.0, "toc menu term in neither tree");
            continue;
        };
        items.push(NavItem::anchor(entry.term.name.clone(), *tid, slugify(&entry.term.name)));
    }
    items
}

fn matches_current(item: &NavItem, current_path: &str, trail: &[TermId]) -> bool {
    let Some(url) = &item.url else {
        return false;
    };
    url == current_path || trail.contains(&item.tid)
}

/// Marks the active path through a menu: an item is active when it has
/// a url and either the url equals the current path or its term is on
/// the trail. Active parents test their children; an active parent
/// without an active child tests its overview entry instead. Children
/// of inactive parents stay untouched.
pub fn mark_active(menu: &mut [NavItem], current_path: &str, trail: &[TermId]) {
    for item in menu {
        if !matches_current(item, current_path, trail) {
            continue;
        }
        item.is_active = true;

        let mut child_active = false;
        for entry in &mut item.children {
            let Some(child) = entry.as_nav_mut() else {
                continue;
            };
            if matches_current(child, current_path, trail) {
                child.is_active = true;
                child_active = true;
            }
        }
        if !child_active {
            if let Some(overview) = &mut item.main {
                if matches_current(overview, current_path, trail) {
                    overview.is_active = true;
                }
            }
        }
    }
}

fn first_active_descent(items: &[&NavItem], crumbs: &mut Vec<Breadcrumb>) {
    for item in items {
        if !item.is_active {
            continue;
        }
        let (name, url) = match &item.main {
            Some(overview) => (overview.name.clone(), overview.url.clone()),
            None => (item.name.clone(), item.url.clone()),
        };
        crumbs.push(Breadcrumb { name, url });

        let children: Vec<&NavItem> =
            item.children.iter().filter_map(MenuEntry::as_nav).collect();
        first_active_descent(&children, crumbs);
        return;
    }
}

/// Assembles the breadcrumb trail from the three active-marked menus.
///
/// The first main-menu item opens the trail as Home. Menus are consulted
/// main, meta, subsidy; the first menu that extends the trail ends the
/// search. Within a menu the first active item per level wins, its
/// overview name and url standing in when present. Consecutive entries
/// with the same url collapse into the first. The closing entry loses
/// its url when it is the current page, otherwise the current title is
/// appended url-less. A Home-only trail is returned as-is.
#[must_use]
pub fn breadcrumbs(
    main: &[NavItem],
    meta: &[NavItem],
    subsidy: &[NavItem],
    current_path: &str,
    current_title: &str,
) -> Vec<Breadcrumb> {
    let mut crumbs = Vec::new();
    if let Some(home) = main.first() {
        crumbs.push(Breadcrumb { name: home.name.clone(), url: home.url.clone() });
    }

    let base = crumbs.len();
    for menu in [main, meta, subsidy] {
        let items: Vec<&NavItem> = menu.iter().collect();
        first_active_descent(&items, &mut crumbs);
        if crumbs.len() > base {
            break;
        }
    }

    crumbs.dedup_by(|next, previous| previous.url.is_some() && previous.url == next.url);
    if crumbs.len() <= 1 {
        return crumbs;
    }

    let Some(last) = crumbs.last_mut() else {
        return crumbs;
    };
    if last.url.as_deref() == Some(current_path) {
        last.url = None;
    } else {
        crumbs.push(Breadcrumb { name: current_title.to_string(), url: None });
    }
    crumbs
}
