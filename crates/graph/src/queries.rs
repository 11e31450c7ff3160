//! Parameterised Cypher templates
//!
//! Every query takes its values through the parameter map; tenant ids are
//! never concatenated into query text. Property names match the node
//! schema exactly.

/// Upserts executed inside one explicit write transaction, in this order.
pub const DIALOGUE_NODE_SAVE: &str = r#"
MERGE (d:Dialogue {id: $id})
SET d.end_user_id = $end_user_id,
    d.config_id = $config_id,
    d.run_id = $run_id,
    d.ref_id = $ref_id,
    d.content = $content,
    d.dialog_embedding = $dialog_embedding,
    d.created_at = $created_at,
    d.expired_at = $expired_at
RETURN d.id AS id
"#;

pub const CHUNK_NODES_SAVE: &str = r#"
UNWIND $chunks AS row
MERGE (c:Chunk {id: row.id})
SET c += row
WITH c, row
MATCH (d:Dialogue {id: row.dialogue_id})
MERGE (d)-[:OWNS_CHUNK]->(c)
RETURN c.id AS id
"#;

pub const STATEMENT_NODES_SAVE: &str = r#"
UNWIND $statements AS row
MERGE (s:Statement {id: row.id})
SET s += row
RETURN s.id AS id
"#;

pub const EXTRACTED_ENTITY_NODES_SAVE: &str = r#"
UNWIND $entities AS row
MERGE (e:ExtractedEntity {id: row.id})
SET e += row
RETURN e.id AS id
"#;

pub const MEMORY_SUMMARY_NODES_SAVE: &str = r#"
UNWIND $summaries AS row
MERGE (m:MemorySummary {id: row.id})
SET m += row
RETURN m.id AS id
"#;

pub const STATEMENT_CHUNK_EDGES_SAVE: &str = r#"
UNWIND $edges AS row
MATCH (s:Statement {id: row.source}), (c:Chunk {id: row.target})
MERGE (s)-[r:DERIVED_FROM]->(c)
SET r.id = row.id,
    r.end_user_id = row.end_user_id,
    r.run_id = row.run_id,
    r.created_at = row.created_at,
    r.expired_at = row.expired_at
RETURN r.id AS id
"#;

pub const STATEMENT_ENTITY_EDGES_SAVE: &str = r#"
UNWIND $edges AS row
MATCH (s:Statement {id: row.source}), (e:ExtractedEntity {id: row.target})
MERGE (s)-[r:REFERENCES_ENTITY]->(e)
SET r.id = row.id,
    r.end_user_id = row.end_user_id,
    r.run_id = row.run_id,
    r.connect_strength = row.connect_strength,
    r.created_at = row.created_at,
    r.expired_at = row.expired_at
RETURN r.id AS id
"#;

pub const ENTITY_RELATIONSHIPS_SAVE: &str = r#"
UNWIND $relationships AS row
MATCH (a:ExtractedEntity {id: row.source}), (b:ExtractedEntity {id: row.target})
CALL apoc.merge.relationship(a, row.predicate, {id: row.id}, {
    end_user_id: row.end_user_id,
    run_id: row.run_id,
    value: row.value,
    statement: row.statement,
    source_statement_id: row.source_statement_id,
    valid_at: row.valid_at,
    invalid_at: row.invalid_at,
    created_at: row.created_at,
    expired_at: row.expired_at
}, b) YIELD rel
RETURN row.id AS id
"#;

pub const SUMMARY_EDGES_SAVE: &str = r#"
UNWIND $edges AS row
MATCH (m:MemorySummary {id: row.source})
MATCH (t {id: row.target})
CALL apoc.merge.relationship(m, row.kind, {id: row.id}, {
    end_user_id: row.end_user_id,
    run_id: row.run_id,
    created_at: row.created_at,
    expired_at: row.expired_at
}, t) YIELD rel
RETURN row.id AS id
"#;

/// Full-text search over the per-label index
pub const KEYWORD_SEARCH: &str = r#"
CALL db.index.fulltext.queryNodes($index_name, $query) YIELD node, score
WHERE node.end_user_id = $end_user_id
RETURN properties(node) AS node, labels(node)[0] AS label, score
ORDER BY score DESC, node.id ASC
LIMIT $k
"#;

/// Cosine search over the per-label vector index
pub const VECTOR_SEARCH: &str = r#"
CALL db.index.vector.queryNodes($index_name, $k, $embedding) YIELD node, score
WHERE node.end_user_id = $end_user_id AND score >= $threshold
RETURN properties(node) AS node, labels(node)[0] AS label, score
ORDER BY score DESC, node.id ASC
"#;

/// Range scan for statements (anchored on `valid_at`)
pub const TEMPORAL_SEARCH_STATEMENTS: &str = r#"
MATCH (s:Statement)
WHERE s.end_user_id = $end_user_id
  AND s.valid_at >= $start AND s.valid_at <= $end
RETURN properties(s) AS node, 'Statement' AS label, 1.0 AS score
ORDER BY s.valid_at DESC, s.id ASC
LIMIT $k
"#;

/// Range scan for non-statement labels (anchored on `created_at`);
/// `{label}` is substituted from the trusted `NodeLabel` enum, never from
/// caller input.
pub const TEMPORAL_SEARCH_BY_CREATED: &str = r#"
MATCH (n:{label})
WHERE n.end_user_id = $end_user_id
  AND n.created_at >= $start AND n.created_at <= $end
RETURN properties(n) AS node, '{label}' AS label, 1.0 AS score
ORDER BY n.created_at DESC, n.id ASC
LIMIT $k
"#;

pub const FETCH_BY_IDS: &str = r#"
MATCH (n)
WHERE n.id IN $ids
RETURN properties(n) AS node, labels(n)[0] AS label
"#;

pub const UPDATE_ACTIVATION: &str = r#"
MATCH (n {id: $node_id})
WHERE n.end_user_id IS NOT NULL
SET n.activation_value = $activation_value,
    n.last_accessed_at = $last_accessed_at,
    n.access_history = $access_history
RETURN n.id AS id
"#;

/// Low-activation Statement+Entity pairs, ascending by mean activation.
/// Always tenant-filtered when a tenant is given.
pub const LIST_FORGETTABLE_PAIRS: &str = r#"
MATCH (s:Statement)-[:REFERENCES_ENTITY]->(e:ExtractedEntity)
WHERE ($end_user_id IS NULL OR s.end_user_id = $end_user_id)
  AND s.last_accessed_at <= $cutoff
  AND e.last_accessed_at <= $cutoff
  AND (s.activation_value + e.activation_value) / 2.0 < $activation_threshold
RETURN properties(s) AS statement, properties(e) AS entity,
       (s.activation_value + e.activation_value) / 2.0 AS avg_activation
ORDER BY avg_activation ASC, s.id ASC
LIMIT $limit
"#;

/// Atomic pair merge: delete the pair, create the summary, reattach former
/// chunks and related summaries.
pub const MERGE_PAIR_INTO_SUMMARY: &str = r#"
MATCH (s:Statement {id: $statement_id}), (e:ExtractedEntity {id: $entity_id})
OPTIONAL MATCH (s)-[:DERIVED_FROM]->(c:Chunk)
WITH s, e, collect(DISTINCT c) AS chunks
OPTIONAL MATCH (rel:MemorySummary)-[:DERIVED_FROM_STATEMENT]->(s)
WITH s, e, chunks, collect(DISTINCT rel) AS related
MERGE (m:MemorySummary {id: $summary.id})
SET m += $summary
WITH s, e, chunks, related, m
FOREACH (c IN chunks | MERGE (m)-[:DERIVED_FROM_CHUNK]->(c))
FOREACH (r IN related | MERGE (m)-[:RELATED_SUMMARY]->(r))
DETACH DELETE s, e
RETURN m.id AS id
"#;

pub const ENTITIES_BY_TYPE: &str = r#"
MATCH (e:ExtractedEntity)
WHERE e.end_user_id = $end_user_id AND e.entity_type = $entity_type
RETURN properties(e) AS node
ORDER BY e.id ASC
"#;

pub const COUNT_KNOWLEDGE_NODES: &str = r#"
OPTIONAL MATCH (s:Statement)
WHERE $end_user_id IS NULL OR s.end_user_id = $end_user_id
WITH count(s) AS statements
OPTIONAL MATCH (e:ExtractedEntity)
WHERE $end_user_id IS NULL OR e.end_user_id = $end_user_id
WITH statements, count(e) AS entities
OPTIONAL MATCH (m:MemorySummary)
WHERE $end_user_id IS NULL OR m.end_user_id = $end_user_id
RETURN statements, entities, count(m) AS summaries
"#;

pub const COUNT_MEMORIES: &str = r#"
MATCH (c:Chunk)
WHERE c.end_user_id = $end_user_id
RETURN c.perceptual_type AS perceptual_type, count(c) AS count
"#;

pub const LATEST_CHUNK: &str = r#"
MATCH (c:Chunk)
WHERE c.end_user_id = $end_user_id AND c.perceptual_type = $perceptual_type
RETURN properties(c) AS node
ORDER BY c.created_at DESC, c.id ASC
LIMIT 1
"#;

pub const LIST_SUMMARIES: &str = r#"
MATCH (m:MemorySummary)
WHERE m.end_user_id = $end_user_id
  AND ($start IS NULL OR m.created_at >= $start)
  AND ($memory_type IS NULL OR m.memory_type = $memory_type)
  AND ($title_keyword IS NULL OR toLower(m.name) CONTAINS toLower($title_keyword))
RETURN properties(m) AS node
ORDER BY m.created_at DESC, m.id ASC
LIMIT $k
"#;

pub const SUMMARY_DETAIL: &str = r#"
MATCH (m:MemorySummary {id: $summary_id})
WHERE m.end_user_id = $end_user_id
OPTIONAL MATCH (m)-[:DERIVED_FROM_STATEMENT]->(s:Statement)
OPTIONAL MATCH (s)-[:REFERENCES_ENTITY]->(e:ExtractedEntity)
OPTIONAL MATCH (c:Chunk) WHERE c.id IN m.chunk_ids
RETURN properties(m) AS summary,
       collect(DISTINCT properties(s)) AS statements,
       collect(DISTINCT properties(e)) AS entities,
       collect(DISTINCT properties(c)) AS chunks
"#;

/// Names of the per-label full-text indexes
pub fn fulltext_index_name(label: engram_core::NodeLabel) -> &'static str {
    use engram_core::NodeLabel::*;
    match label {
        Dialogue => "dialogue_fulltext",
        Chunk => "chunk_fulltext",
        Statement => "statement_fulltext",
        ExtractedEntity => "entity_fulltext",
        MemorySummary => "summary_fulltext",
    }
}

/// Names of the per-label vector indexes
pub fn vector_index_name(label: engram_core::NodeLabel) -> &'static str {
    use engram_core::NodeLabel::*;
    match label {
        Dialogue => "dialogue_embedding_index",
        Chunk => "chunk_embedding_index",
        Statement => "statement_embedding_index",
        ExtractedEntity => "entity_name_embedding_index",
        MemorySummary => "summary_embedding_index",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_query_interpolates_tenant() {
        // Tenant scoping always goes through $end_user_id parameters.
        for query in [
            KEYWORD_SEARCH,
            VECTOR_SEARCH,
            TEMPORAL_SEARCH_STATEMENTS,
            LIST_FORGETTABLE_PAIRS,
            ENTITIES_BY_TYPE,
            COUNT_MEMORIES,
            LIST_SUMMARIES,
            SUMMARY_DETAIL,
        ] {
            assert!(query.contains("$end_user_id"), "missing tenant param: {query}");
        }
    }

    #[test]
    fn test_index_names_unique() {
        use engram_core::NodeLabel;
        let labels = [
            NodeLabel::Dialogue,
            NodeLabel::Chunk,
            NodeLabel::Statement,
            NodeLabel::ExtractedEntity,
            NodeLabel::MemorySummary,
        ];
        let mut names: Vec<&str> = labels.iter().map(|l| fulltext_index_name(*l)).collect();
        names.extend(labels.iter().map(|l| vector_index_name(*l)));
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
    }
}
