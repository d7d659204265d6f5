use crate::agents::descriptor::AgentDescriptor;

#[derive(Debug, Clone, PartialEq, Eq)]
struct RouteRule {
    agent: String,
    keywords: Vec<String>,
}

/// Deterministic first pass over a request. Leaves are matched in the order
/// they were registered, so the plan follows the coordinator's priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordRouter {
    rules: Vec<RouteRule>,
}

impl KeywordRouter {
    pub fn new<'a>(leaves: impl IntoIterator<Item = &'a AgentDescriptor>) -> Self {
        let rules = leaves
            .into_iter()
            .filter(|leaf| !leaf.keywords.is_empty())
            .map(|leaf| RouteRule {
                agent: leaf.name.clone(),
                keywords: leaf.keywords.clone(),
            })
            .collect();
        Self { rules }
    }

    /// Leaves whose keywords appear in `query`, each at most once.
    pub fn plan(&self, query: &str) -> Vec<String> {
        let haystack = query.to_lowercase();
        self.rules
            .iter()
            .filter(|rule| rule.keywords.iter().any(|k| contains_keyword(&haystack, k)))
            .map(|rule| rule.agent.clone())
            .collect()
    }

    pub fn matched_keywords(&self, agent: &str, query: &str) -> Vec<String> {
        let haystack = query.to_lowercase();
        self.rules
            .iter()
            .filter(|rule| rule.agent == agent)
            .flat_map(|rule| rule.keywords.iter())
            .filter(|k| contains_keyword(&haystack, k))
            .cloned()
            .collect()
    }
}

/// Whole-word keyword match: "post" hits "a post" but not "signpost" or
/// "postpone". Inflections are listed as separate keywords.
fn contains_keyword(haystack: &str, keyword: &str) -> bool {
    if keyword.is_empty() {
        return false;
    }
    let boundary = |c: Option<char>| c.is_none_or(|c| !c.is_alphanumeric());
    haystack.match_indices(keyword).any(|(idx, _)| {
        boundary(haystack[..idx].chars().next_back())
            && boundary(haystack[idx + keyword.len()..].chars().next())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::descriptor::LlmAgentBuilder;

    fn leaf(name: &str, keywords: &[&str]) -> AgentDescriptor {
        LlmAgentBuilder::new(name)
            .keywords(keywords)
            .build()
            .expect("leaf")
    }

    #[test]
    fn plan_follows_registration_order_not_query_order() {
        let leaves = [
            leaf("venue", &["venue"]),
            leaf("budget", &["budget"]),
            leaf("social", &["promo", "post"]),
        ];
        let router = KeywordRouter::new(leaves.iter());
        assert_eq!(
            router.plan("A promo POST, then a budget, and finally a Venue"),
            vec!["venue", "budget", "social"]
        );
    }

    #[test]
    fn keywords_match_whole_words_only() {
        assert!(contains_keyword("need a $5,000 budget", "budget"));
        assert!(contains_keyword("a post, soon", "post"));
        assert!(!contains_keyword("posting soon", "post"));
        assert!(!contains_keyword("a signpost", "post"));
        assert!(!contains_keyword("postpone the gala", "post"));
        assert!(contains_keyword("plan a festival", "plan a"));
        assert!(!contains_keyword("plan an expo", "plan a"));
        assert!(!contains_keyword("anything", ""));
    }

    #[test]
    fn matched_keywords_reports_hits() {
        let leaves = [leaf("venue", &["venue", "hall", "map"])];
        let router = KeywordRouter::new(leaves.iter());
        assert_eq!(
            router.matched_keywords("venue", "a hall near the map"),
            vec!["hall", "map"]
        );
        assert!(router.plan("nothing relevant").is_empty());
    }
}
