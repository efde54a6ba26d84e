/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `mcp`: list servers, list aggregated tools, invoke a tool

These handlers are intentionally small and use the library components:
the MCP client, the tool multiplexer, and the configuration.
*/

pub mod mcp;
