pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# STREAMRAG CONFIGURATION
# =============================================================================
# Events from each stream are grouped into windows. A window closes after
# window_duration_seconds or after window_max_events events, whichever comes
# first. Closed windows are summarized, embedded and stored so that questions
# sent to POST /query can be answered from recent stream data.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/streamrag/config.yml
#   3. /etc/streamrag/config.yml
#
# Any value may reference an environment variable as $env{VAR_NAME}.

# =============================================================================
# STREAMS
# =============================================================================
# Each stream is keyed as <name>_<partition>. The (name, partition) pair must
# be unique.

streams:
  - name: financial_transactions
    partition: 0
    # Description included in every window summary
    context: "Financial transactions from the payments service"
    window_duration_seconds: 60
    # Close early after this many events (0 disables)
    window_max_events: 100
    source:
      type: file
      # One JSON document per line
      path: /var/log/payments/transactions.jsonl
      # Optional JSON field used as the event key
      key_field: transaction_id
      # Optional JSON field holding an RFC 3339 timestamp (defaults to read time)
      timestamp_field: timestamp
      read:
        # Where to start reading: 'beginning' or 'end'
        start: beginning
        # Keep watching for new lines after EOF
        follow: true

# =============================================================================
# PIPELINE SETTINGS
# =============================================================================

pipeline:
  # Pause after a failed read before retrying
  retry_backoff: 1s
  # How long shutdown waits for in-flight windows to be stored
  shutdown_grace: 5s
  # Store the raw events alongside each window
  keep_raw_events: false
  # Do not embed or store windows that closed with no events
  skip_empty_windows: true

# =============================================================================
# OLLAMA
# =============================================================================

ollama:
  url: http://localhost:11434
  embedding_model: nomic-embed-text
  llm_model: llama3
  embed_timeout: 30s
  generate_timeout: 120s
  # Retries on 429, 5xx and connection errors, with exponential backoff
  max_retries: 3

# =============================================================================
# STORAGE SETTINGS
# =============================================================================

storage:
  # 'duckdb' (persistent) or 'memory'
  type: duckdb
  path: ~/.local/share/streamrag/windows.duckdb

# =============================================================================
# WEB SERVER SETTINGS
# =============================================================================

web:
  listen: 0.0.0.0:8080
  # Windows retrieved per query unless the request sets top_k
  top_k: 5
"#
    .to_string()
}
